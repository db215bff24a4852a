use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Sync,
    Reconciliation,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Sync => "sync",
            RunKind::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "reconciliation" {
            RunKind::Reconciliation
        } else {
            RunKind::Sync
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "partial" => RunStatus::Partial,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }

    /// Per-record failures make a run partial, never completed.
    pub fn from_failures(failed: i32) -> Self {
        if failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub checked: i32,
    pub updated: i32,
    pub failed: i32,
    pub skipped: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub duration_ms: i64,
    pub details: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunLog {
    pub fn start(kind: RunKind, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            duration_ms: 0,
            details,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(mut self, status: RunStatus, counts: RunCounts, details: serde_json::Value) -> Self {
        let now = Utc::now();
        self.status = status;
        self.counts = counts;
        self.details = details;
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0);
        self.finished_at = Some(now);
        self
    }

    pub fn fail(self, counts: RunCounts, error: &str) -> Self {
        let details = self.details.clone();
        let mut run = self.finish(RunStatus::Failed, counts, details);
        run.error_message = Some(error.to_string());
        run
    }
}
