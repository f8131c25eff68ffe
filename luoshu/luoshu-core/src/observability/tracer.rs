use std::time::Instant;

use log::debug;

/// 作用域跨度。被 drop 时结束
pub trait Span: Send {}

/// 可替换的追踪器。核心为每次流运行与每次任务派发打开一个跨度
pub trait Tracer: Send + Sync {
  fn span(&self, name: &str, attrs: &[(&str, String)]) -> Box<dyn Span>;
}

/// 默认追踪器：跨度的开始与耗时写入日志
pub struct LogTracer;

struct LogSpan {
  name: String,
  started_at: Instant,
}

impl Span for LogSpan {}

impl Drop for LogSpan {
  fn drop(&mut self) {
    debug!("span closed: {}, elapsed: {:?}", self.name, self.started_at.elapsed());
  }
}

impl Tracer for LogTracer {
  fn span(&self, name: &str, attrs: &[(&str, String)]) -> Box<dyn Span> {
    debug!("span opened: {}, attrs: {:?}", name, attrs);
    Box::new(LogSpan { name: name.to_string(), started_at: Instant::now() })
  }
}

/// 不产生任何跨度
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {}

impl Tracer for NoopTracer {
  fn span(&self, _name: &str, _attrs: &[(&str, String)]) -> Box<dyn Span> {
    Box::new(NoopSpan)
  }
}
