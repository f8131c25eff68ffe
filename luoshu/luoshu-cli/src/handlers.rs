use std::str::FromStr;

use luoshu_core::flow::{Flow, FlowRegistry, RunOptions};
use luoshu_core::types::{FailurePolicy, ParamsMap};

use crate::command::{DescribeFlow, RunFlow};
use crate::error::{CliError, CliResult};

/// 流命令处理器
pub struct FlowHandler {
  registry: &'static FlowRegistry,
}

impl FlowHandler {
  pub fn new() -> Self {
    Self { registry: FlowRegistry::global() }
  }

  fn resolve(&self, name: &str) -> CliResult<Flow> {
    self.registry.get(name).ok_or_else(|| {
      CliError::usage(format!("未注册的流: {}（可用流见 `luoshu list`）", name))
    })
  }

  /// 运行流
  pub async fn run(&self, args: &RunFlow) -> CliResult<()> {
    let flow = self.resolve(&args.flow)?;

    let failure_policy = FailurePolicy::from_str(&args.failure_policy)
      .map_err(|_| CliError::usage(format!("非法的失败策略: {}", args.failure_policy)))?;
    if args.max_concurrency == Some(0) {
      return Err(CliError::usage("并发上限必须为正整数"));
    }
    let params = parse_params(args.params.as_deref())?;

    let builder = RunOptions::builder().params(params).failure_policy(failure_policy);
    let options = match args.max_concurrency {
      Some(limit) => builder.max_concurrency(limit).build(),
      None => builder.build(),
    };

    match flow.run(options).await {
      Ok(value) => {
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()));
        Ok(())
      }
      Err(e) => Err(CliError::run_failed(e.to_string())),
    }
  }

  /// 描述流
  pub async fn describe(&self, args: &DescribeFlow) -> CliResult<()> {
    let flow = self.resolve(&args.flow)?;
    match args.format.as_str() {
      "json" => {
        let graph = flow.describe().map_err(|e| CliError::run_failed(e.to_string()))?;
        println!("{}", serde_json::to_string_pretty(&graph).unwrap_or_else(|_| graph.to_string()));
        Ok(())
      }
      "dot" => {
        let dot = flow.export_dot().map_err(|e| CliError::run_failed(e.to_string()))?;
        print!("{}", dot);
        Ok(())
      }
      other => Err(CliError::usage(format!("非法的输出格式: {}", other))),
    }
  }

  /// 列出已注册的流
  pub fn list(&self) -> CliResult<()> {
    let names = self.registry.names();
    if names.is_empty() {
      println!("没有已注册的流");
      return Ok(());
    }
    for name in names {
      println!("{}", name);
    }
    Ok(())
  }
}

impl Default for FlowHandler {
  fn default() -> Self {
    Self::new()
  }
}

fn parse_params(raw: Option<&str>) -> CliResult<ParamsMap> {
  let Some(raw) = raw else {
    return Ok(ParamsMap::new());
  };
  let value: serde_json::Value =
    serde_json::from_str(raw).map_err(|e| CliError::usage(format!("参数不是合法的 JSON: {}", e)))?;
  match value {
    serde_json::Value::Object(map) => Ok(map),
    _ => Err(CliError::usage("参数必须是 JSON 对象")),
  }
}
