//! Request and response messages for the boundary protocol.

use serde::{Deserialize, Serialize};

use super::batch::{Batch, StatusReport};

/// Correlation identity assigned to each request.
///
/// Every request eventually produces exactly one response carrying the same
/// id, or a termination event that rejects all pending requests.
pub type CallId = u64;

/// A command for the background fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Open the streamed response and start reading.
    Start { url: String },
    /// Report the current fetcher status. No side effects.
    Status,
    /// Dequeue the oldest unread batch, if any.
    Next,
    /// Abort the connection, discard the queue, and tear down.
    Destroy,
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Status => "status",
            Command::Next => "next",
            Command::Destroy => "destroy",
        }
    }
}

/// A correlated request crossing the isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed back in the response.
    pub id: CallId,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// The payload of a correlated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Payload<T> {
    /// The stream was opened; the fetcher is running.
    Started,
    /// Answer to [`Command::Status`].
    Status(StatusReport),
    /// Answer to [`Command::Next`].
    Batch(Batch<T>),
    /// The fetcher tore down in response to [`Command::Destroy`].
    Destroyed,
    /// The command failed.
    Error { message: String },
}

impl<T> Payload<T> {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Started => "started",
            Payload::Status(_) => "status",
            Payload::Batch(_) => "batch",
            Payload::Destroyed => "destroyed",
            Payload::Error { .. } => "error",
        }
    }
}

/// A correlated response from the background fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    /// Correlation id of the request being answered.
    pub id: CallId,
    /// The response payload.
    pub payload: Payload<T>,
}
