use clap::{Args, Parser, Subcommand};

/// Luoshu CLI - 进程内工作流引擎命令行工具
///
/// 按名运行、描述与列出注册表中的流。流通过 `FlowRegistry`
/// （显式注册或 `inventory` 链接期登记）对 CLI 可见。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// 运行一个已注册的流
  Run(RunFlow),
  /// 输出流的邻接 JSON 描述
  Describe(DescribeFlow),
  /// 列出所有已注册的流
  List,
}

/// 运行流的参数
#[derive(Args, Debug)]
pub struct RunFlow {
  /// 要运行的流名称
  #[arg(value_name = "FLOW", help = "已注册的流名称")]
  pub flow: String,

  /// 失败策略
  #[arg(long, default_value = "fail_fast", help = "失败策略：fail_fast、continue 或 aggregate")]
  pub failure_policy: String,

  /// 并发上限
  #[arg(long, help = "同时运行的任务数上限（正整数），缺省不限制")]
  pub max_concurrency: Option<usize>,

  /// 运行参数
  #[arg(long, help = "以 JSON 对象传入的运行参数，如 '{\"region\": \"cn-east\"}'")]
  pub params: Option<String>,
}

/// 描述流的参数
#[derive(Args, Debug)]
pub struct DescribeFlow {
  /// 要描述的流名称
  #[arg(value_name = "FLOW", help = "已注册的流名称")]
  pub flow: String,

  /// 输出格式
  #[arg(short, long, default_value = "json", help = "输出格式（json 或 dot）")]
  pub format: String,
}
