//! Per-scope log of executed batches.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a batch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// The executor returned; `missing` units got no value for their key.
    Success { resolved: usize, missing: usize },
    /// The executor failed and every unit received the same error.
    Failed { message: String },
    /// The owning scope shut down before the batch window closed.
    Abandoned,
}

impl BatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Success { missing: 0, .. } => "SUCCESS",
            BatchOutcome::Success { .. } => "PARTIAL",
            BatchOutcome::Failed { .. } => "FAILURE",
            BatchOutcome::Abandoned => "ABANDONED",
        }
    }
}

/// One entry of the request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedBatch {
    pub collapser: String,
    /// Units sealed into the batch, duplicates included.
    pub batch_size: usize,
    /// Keys handed to the executor.
    pub distinct_keys: usize,
    pub outcome: BatchOutcome,
    pub elapsed_ms: u64,
}

impl ExecutedBatch {
    pub(crate) fn new(
        collapser: impl Into<String>,
        batch_size: usize,
        distinct_keys: usize,
        outcome: BatchOutcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            collapser: collapser.into(),
            batch_size,
            distinct_keys,
            outcome,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub(crate) fn abandoned(collapser: impl Into<String>, batch_size: usize) -> Self {
        Self::new(
            collapser,
            batch_size,
            0,
            BatchOutcome::Abandoned,
            Duration::ZERO,
        )
    }
}

/// Snapshot of the batches an [`ExecutionScope`](super::ExecutionScope) has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    pub batches: Vec<ExecutedBatch>,
}

impl RequestLog {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Units across all logged batches.
    pub fn total_units(&self) -> usize {
        self.batches.iter().map(|b| b.batch_size).sum()
    }

    pub fn count_for(&self, collapser: &str) -> usize {
        self.batches
            .iter()
            .filter(|b| b.collapser == collapser)
            .count()
    }

    /// One-line summary, e.g. `numbers[SUCCESS][3ms]x501, numbers[SUCCESS][2ms]x499`.
    pub fn executed_batches_as_string(&self) -> String {
        self.batches
            .iter()
            .map(|b| {
                format!(
                    "{}[{}][{}ms]x{}",
                    b.collapser,
                    b.outcome.label(),
                    b.elapsed_ms,
                    b.batch_size
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
