use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::error::TaskFailure;
use crate::types::{JsonValue, NodeName};

pub type FlightResult = Result<JsonValue, Arc<TaskFailure>>;

/// 单飞去重表。同一缓存键的并发派发共享一次执行。
///
/// 始终在内存中、按进程维护（与结果缓存后端无关）。
#[derive(Default)]
pub struct SingleFlight {
  inflight: Arc<DashMap<String, watch::Receiver<Option<FlightResult>>>>,
}

/// 加入单飞的结果：领跑者负责执行并发布结果，跟随者等待
pub enum Flight {
  Leader(FlightGuard),
  Follower(watch::Receiver<Option<FlightResult>>),
}

impl SingleFlight {
  pub fn new() -> Self {
    Self::default()
  }

  /// 按键加入。键未在途则成为领跑者，否则成为跟随者
  pub fn join(&self, key: &str) -> Flight {
    match self.inflight.entry(key.to_string()) {
      Entry::Occupied(entry) => Flight::Follower(entry.get().clone()),
      Entry::Vacant(entry) => {
        let (tx, rx) = watch::channel(None);
        entry.insert(rx);
        Flight::Leader(FlightGuard { key: key.to_string(), tx: Some(tx), inflight: self.inflight.clone() })
      }
    }
  }

  pub fn in_flight_count(&self) -> usize {
    self.inflight.len()
  }
}

/// 领跑者句柄。必须以 [FlightGuard::complete] 发布结果；
/// 若在发布前被 drop（领跑者被取消），跟随者收到取消失败而不会悬挂。
pub struct FlightGuard {
  key: String,
  tx: Option<watch::Sender<Option<FlightResult>>>,
  inflight: Arc<DashMap<String, watch::Receiver<Option<FlightResult>>>>,
}

impl FlightGuard {
  pub fn complete(mut self, result: FlightResult) {
    if let Some(tx) = self.tx.take() {
      let _ = tx.send(Some(result));
    }
    self.inflight.remove(&self.key);
  }
}

impl Drop for FlightGuard {
  fn drop(&mut self) {
    if let Some(tx) = self.tx.take() {
      let _ = tx.send(Some(Err(Arc::new(TaskFailure::Cancelled { node: NodeName::from(self.key.as_str()) }))));
      self.inflight.remove(&self.key);
    }
  }
}

/// 跟随者等待领跑者发布的结果
pub async fn wait(mut rx: watch::Receiver<Option<FlightResult>>, node: &NodeName) -> FlightResult {
  loop {
    let current = rx.borrow().clone();
    if let Some(result) = current {
      return result;
    }
    if rx.changed().await.is_err() {
      return Err(Arc::new(TaskFailure::Cancelled { node: node.clone() }));
    }
  }
}
