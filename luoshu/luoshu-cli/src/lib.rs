//! luoshu 命令行：核心引擎的薄适配层。
//!
//! 退出码约定：0 成功，1 任务/流失败，2 用法错误。

pub mod command;
pub mod error;
pub mod handlers;

mod log_init;

pub use log_init::init_log;

use std::process::ExitCode;

use crate::command::{Cli, Commands};
use crate::error::CliResult;
use crate::handlers::FlowHandler;

/// 进程模式引导：物化注册表中的流（使任务定义完成注册），再给工作端
/// 钩子一次接管机会。必须在解析命令行之前调用——工作进程不带任何参数拉起。
pub fn bootstrap_worker() {
  materialize_flows();
  luoshu_core::worker_main();
}

/// 执行已解析的命令行
pub async fn execute(cli: Cli) -> ExitCode {
  match dispatch(&cli).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{}", e);
      ExitCode::from(e.exit_code())
    }
  }
}

async fn dispatch(cli: &Cli) -> CliResult<()> {
  let handler = FlowHandler::new();
  match &cli.command {
    Commands::Run(args) => handler.run(args).await,
    Commands::Describe(args) => handler.describe(args).await,
    Commands::List => handler.list(),
  }
}

/// 构建一遍所有注册的流，让流体内的任务定义进入进程级任务注册表
fn materialize_flows() {
  let registry = luoshu_core::FlowRegistry::global();
  for name in registry.names() {
    let _ = registry.get(&name);
  }
}
