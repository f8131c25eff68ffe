use crate::types::JsonValue;

use super::Dag;
use super::dag::DagNodeKind;

impl Dag {
  /// 节点的展示标签：任务名或 `fan_out(<task>)`
  fn node_label(kind: &DagNodeKind) -> String {
    match kind {
      DagNodeKind::Task { task, .. } => task.name().to_string(),
      DagNodeKind::FanOut { child_task, .. } => format!("fan_out({})", child_task.name()),
    }
  }

  /// 邻接 JSON 导出。格式稳定：
  /// `{"flow", "nodes":[{"id","label","kind"}], "edges":[{"from","to"}], "count"}`
  pub fn to_adjacency_json(&self) -> JsonValue {
    let mut nodes = Vec::with_capacity(self.node_count());
    let mut edges = Vec::new();

    for name in self.node_names() {
      let node = self.node(name).expect("ordered node must exist");
      let kind = match &node.kind {
        DagNodeKind::Task { .. } => "task",
        DagNodeKind::FanOut { .. } => "fanout",
      };
      let mut entry = serde_json::json!({
        "id": name,
        "label": Self::node_label(&node.kind),
        "kind": kind,
      });
      if let DagNodeKind::FanOut { max_concurrency: Some(limit), .. } = &node.kind
        && let Some(map) = entry.as_object_mut()
      {
        map.insert("max_concurrency".to_string(), JsonValue::from(*limit));
      }
      nodes.push(entry);
      for dependent in self.dependents(name) {
        edges.push(serde_json::json!({ "from": name, "to": dependent }));
      }
    }

    serde_json::json!({
      "flow": self.flow(),
      "nodes": nodes,
      "edges": edges,
      "count": self.node_count(),
    })
  }

  /// DOT 导出。扇出屏障渲染为菱形，所有依赖经由屏障接线
  pub fn to_dot(&self) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", escape(self.flow())));

    for name in self.node_names() {
      let node = self.node(name).expect("ordered node must exist");
      match &node.kind {
        DagNodeKind::Task { task, .. } => {
          out.push_str(&format!("  \"{}\" [label=\"{}\"];\n", escape(name.as_str()), escape(task.name())));
        }
        DagNodeKind::FanOut { child_task, .. } => {
          out.push_str(&format!(
            "  \"{}\" [shape=diamond label=\"fan_out({})\"];\n",
            escape(name.as_str()),
            escape(child_task.name())
          ));
        }
      }
    }
    for name in self.node_names() {
      for dependent in self.dependents(name) {
        out.push_str(&format!("  \"{}\" -> \"{}\";\n", escape(name.as_str()), escape(dependent.as_str())));
      }
    }

    out.push_str("}\n");
    out
  }
}

fn escape(s: &str) -> String {
  s.replace('\\', "\\\\").replace('"', "\\\"")
}
