use log::LevelFilter;
use logforth::append::Stdout;
use logforth::filter::env_filter::EnvFilterBuilder;
use logforth::layout::TextLayout;

/// 按配置的日志级别初始化日志输出（标准输出）
pub fn init_log(log_level: &str) {
  let level = match log_level.to_ascii_lowercase().as_str() {
    "off" => LevelFilter::Off,
    "error" => LevelFilter::Error,
    "warn" => LevelFilter::Warn,
    "debug" => LevelFilter::Debug,
    "trace" => LevelFilter::Trace,
    _ => LevelFilter::Info,
  };
  let filter = EnvFilterBuilder::from_default_env_or(level.to_string().to_ascii_lowercase()).build();

  logforth::starter_log::builder()
    .dispatch(|d| d.filter(filter).append(Stdout::default().with_layout(TextLayout::default())))
    .apply();
}
