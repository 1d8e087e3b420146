//! Batch and status types delivered across the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A bounded, ordered group of records delivered in one `next` call.
///
/// `more = false` is the single authoritative terminal signal: once a
/// terminal batch is observed, no further batches will ever be produced for
/// the run. A batch may legitimately be empty while `more = true` (nothing
/// new yet, stream still open).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    /// Records in stream order.
    pub data: Vec<T>,
    /// Whether the run can still produce batches after this one.
    pub more: bool,
    /// Malformed lines skipped since the previous batch.
    #[serde(default)]
    pub skipped: u64,
}

impl<T> Batch<T> {
    /// A batch of decoded records from a still-open stream.
    pub fn open(data: Vec<T>, skipped: u64) -> Self {
        Self {
            data,
            more: true,
            skipped,
        }
    }

    /// An empty batch meaning "nothing new yet".
    pub fn pending() -> Self {
        Self {
            data: Vec::new(),
            more: true,
            skipped: 0,
        }
    }

    /// The terminal batch: the stream has ended and the queue is drained.
    pub fn terminal() -> Self {
        Self {
            data: Vec::new(),
            more: false,
            skipped: 0,
        }
    }

    /// Whether this batch is the run's terminal signal.
    pub fn is_terminal(&self) -> bool {
        !self.more
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// State machine of the background fetcher.
///
/// Transitions for a run: `Unknown → Running → {Done | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetcherStatus {
    /// Before the first start.
    #[default]
    Unknown,
    /// Present in the closed enum for completeness; a started run moves
    /// straight to [`Running`](Self::Running) and never enters this state.
    Idle,
    /// The stream is open and being read.
    Running,
    /// The stream ended normally; queued batches may still be unread.
    Done,
    /// The run failed (connect or transport).
    Error,
}

impl FetcherStatus {
    /// Whether a consumer poll step has anything to fetch.
    ///
    /// Polling is meaningful while the stream is open and while queued
    /// batches from a finished stream are still draining.
    pub fn is_pollable(self) -> bool {
        matches!(self, FetcherStatus::Running | FetcherStatus::Done)
    }

    /// Whether this is a terminal state for the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, FetcherStatus::Done | FetcherStatus::Error)
    }
}

impl fmt::Display for FetcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherStatus::Unknown => write!(f, "unknown"),
            FetcherStatus::Idle => write!(f, "idle"),
            FetcherStatus::Running => write!(f, "running"),
            FetcherStatus::Done => write!(f, "done"),
            FetcherStatus::Error => write!(f, "error"),
        }
    }
}

/// Status response: the bare state plus a failure detail when in error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Current fetcher state.
    pub status: FetcherStatus,
    /// Failure description when `status` is [`FetcherStatus::Error`].
    #[serde(default)]
    pub detail: Option<String>,
}

impl StatusReport {
    /// A report with no failure detail.
    pub fn of(status: FetcherStatus) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    /// An error report with a detail message.
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: FetcherStatus::Error,
            detail: Some(detail.into()),
        }
    }
}
