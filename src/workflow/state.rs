//! Run state: status, result trail and the values handed back to callers

use super::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Step,
    Map,
    Branch,
    Foreach,
    Workflow,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Step => "step",
            NodeKind::Map => "map",
            NodeKind::Branch => "branch",
            NodeKind::Foreach => "foreach",
            NodeKind::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

/// Output of a node that completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub kind: NodeKind,
    pub output: Value,
    pub duration_ms: u64,
}

/// Everything known about one invocation of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub init_data: Value,
    /// Completed nodes in execution order
    pub records: Vec<NodeRecord>,
    pub failed_node_id: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl WorkflowRun {
    pub(crate) fn new(workflow_id: &str, init_data: Value) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Pending,
            init_data,
            records: Vec::new(),
            failed_node_id: None,
            error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Output recorded for a node, if it completed
    pub fn step_result(&self, node_id: &str) -> Option<&Value> {
        self.records
            .iter()
            .rev()
            .find(|r| r.node_id == node_id)
            .map(|r| &r.output)
    }

    /// Ids of completed nodes in execution order
    pub fn completed_nodes(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.node_id.as_str()).collect()
    }

    pub(crate) fn mark_failed(&mut self, node_id: Option<String>, error: &EngineError) {
        self.status = RunStatus::Failed;
        self.failed_node_id = node_id;
        self.error = Some(error.to_string());
    }
}

/// A successful run
#[derive(Debug, Clone)]
pub struct RunReport<O> {
    pub output: O,
    pub run: WorkflowRun,
}

/// A failed run, with everything that completed before the failure
#[derive(Debug)]
pub struct RunFailure {
    pub run: Box<WorkflowRun>,
    pub node_id: Option<String>,
    pub error: EngineError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "failed at step '{}': {}", id, self.error),
            None => write!(f, "run failed: {}", self.error),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_run_is_pending() {
        let run = WorkflowRun::new("daily", json!({"date": "2026-10-19"}));
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.workflow_id, "daily");
        assert!(!run.run_id.is_empty());
        assert!(run.records.is_empty());
    }

    #[test]
    fn test_step_result_lookup() {
        let mut run = WorkflowRun::new("daily", json!(null));
        run.records.push(NodeRecord {
            node_id: "fetch".into(),
            kind: NodeKind::Step,
            output: json!([1, 2]),
            duration_ms: 3,
        });
        assert_eq!(run.step_result("fetch"), Some(&json!([1, 2])));
        assert_eq!(run.step_result("missing"), None);
        assert_eq!(run.completed_nodes(), vec!["fetch"]);
    }

    #[test]
    fn test_failure_display() {
        let mut run = WorkflowRun::new("daily", json!(null));
        let error = EngineError::BranchNoMatch {
            branch: "route".into(),
        };
        run.mark_failed(Some("route".into()), &error);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("no branch matched in 'route'"));

        let failure = RunFailure {
            run: Box::new(run),
            node_id: Some("route".into()),
            error,
        };
        assert_eq!(
            failure.to_string(),
            "failed at step 'route': no branch matched in 'route'"
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(RunStatus::Succeeded).unwrap(),
            json!("succeeded")
        );
        assert_eq!(serde_json::to_value(NodeKind::Foreach).unwrap(), json!("foreach"));
    }
}
