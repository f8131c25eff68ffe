use std::process::ExitCode;

use clap::Parser;
use luoshu_cli::command::Cli;

#[tokio::main]
async fn main() -> ExitCode {
  // 工作进程不带参数拉起，引导必须先于命令行解析
  luoshu_cli::bootstrap_worker();

  let cli = Cli::parse();

  let setting = luoshu_core::Runtime::global().setting();
  luoshu_cli::init_log(&setting.log_level);

  luoshu_cli::execute(cli).await
}
