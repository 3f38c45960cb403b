//! Run and NodeExecution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Run lifecycle status; terminal once it leaves `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error of a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub node: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub subject_id: String,
    pub status: RunStatus,
    /// Node currently (or last) executing
    pub current_node: Option<String>,
    pub base_seed: i64,
    pub manifest_hash: String,
    pub fix_iterations: u32,
    /// Last validation report observed by the orchestrator
    pub last_validation: Option<Value>,
    pub error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        subject_id: impl Into<String>,
        base_seed: i64,
        manifest_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            subject_id: subject_id.into(),
            status: RunStatus::Pending,
            current_node: None,
            base_seed,
            manifest_hash: manifest_hash.into(),
            fix_iterations: 0,
            last_validation: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Apply a field-level patch, stamping `updated_at` (and `finished_at` on
    /// entering a terminal status)
    pub fn apply(&mut self, patch: RunPatch) {
        let now = Utc::now();
        if let Some(status) = patch.status {
            if status.is_terminal() && !self.status.is_terminal() {
                self.finished_at = Some(now);
            }
            self.status = status;
        }
        if let Some(node) = patch.current_node {
            self.current_node = Some(node);
        }
        if let Some(iterations) = patch.fix_iterations {
            self.fix_iterations = iterations;
        }
        if let Some(validation) = patch.last_validation {
            self.last_validation = Some(validation);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.updated_at = now;
    }
}

/// Field-level update for a run; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub current_node: Option<String>,
    pub fix_iterations: Option<u32>,
    pub last_validation: Option<Value>,
    pub error: Option<RunError>,
}

impl RunPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_node(mut self, node: impl Into<String>) -> Self {
        self.current_node = Some(node.into());
        self
    }

    pub fn fix_iterations(mut self, iterations: u32) -> Self {
        self.fix_iterations = Some(iterations);
        self
    }

    pub fn last_validation(mut self, report: Value) -> Self {
        self.last_validation = Some(report);
        self
    }

    pub fn error(mut self, error: RunError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
}

/// One node invocation; append-only once terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub execution_id: String,
    pub run_id: String,
    pub node: String,
    /// 0-based position in the run's execution sequence
    pub node_index: usize,
    pub seed: i64,
    pub status: NodeStatus,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl NodeExecution {
    /// A fresh `running` record
    pub fn start(
        run_id: impl Into<String>,
        node: impl Into<String>,
        node_index: usize,
        seed: i64,
        inputs: Value,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            node: node.into(),
            node_index,
            seed,
            status: NodeStatus::Running,
            inputs,
            outputs: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != NodeStatus::Running
    }
}
