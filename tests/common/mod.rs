//! Test utilities for ndstream integration tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use serde::Deserialize;
use url::Url;

use ndstream::{ChunkStream, Connect, Error, Result};

/// Record type used across the integration tests.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Row {
    pub seq: u64,
}

/// One transport chunk of a scripted connection.
#[derive(Clone)]
pub enum Chunk {
    Data(Bytes),
    Fail(io::ErrorKind, String),
}

impl Chunk {
    fn into_io(self) -> io::Result<Bytes> {
        match self {
            Chunk::Data(bytes) => Ok(bytes),
            Chunk::Fail(kind, message) => Err(io::Error::new(kind, message)),
        }
    }
}

/// Outcome of one connection attempt.
#[derive(Clone)]
pub enum Outcome {
    /// Serve these chunks, then end the stream.
    Serve(Vec<Chunk>),
    /// Refuse the connection.
    Refuse,
    /// Never complete the connection attempt.
    Hang,
}

/// A mock connector that replays scripted outcomes, one per connection
/// attempt, in order. Attempts beyond the script are refused.
pub struct MockConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
}

impl MockConnector {
    /// Create a connector from a sequence of connection outcomes.
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    /// Create a connector that serves one scripted stream.
    pub fn serving(outcome: Outcome) -> Self {
        Self::new(vec![outcome])
    }

    /// Create a connector that refuses every connection.
    pub fn refusing() -> Self {
        Self::new(Vec::new())
    }
}

impl Connect for MockConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
        let outcome = self.outcomes.lock().unwrap().pop_front();
        let url = url.to_string();
        async move {
            match outcome {
                Some(Outcome::Serve(chunks)) => {
                    let chunks: Vec<io::Result<Bytes>> =
                        chunks.into_iter().map(Chunk::into_io).collect();
                    Ok(stream::iter(chunks).boxed() as ChunkStream)
                }
                Some(Outcome::Hang) => futures::future::pending().await,
                Some(Outcome::Refuse) | None => Err(Error::connect(
                    url,
                    io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
                )),
            }
        }
        .boxed()
    }
}

/// Builder for realistic NDJSON stream scripts.
pub struct ScenarioBuilder {
    chunks: Vec<Chunk>,
    current: Vec<u8>,
}

impl ScenarioBuilder {
    /// Create a new scenario builder.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            current: Vec::new(),
        }
    }

    /// Append one record line.
    pub fn record(mut self, seq: u64) -> Self {
        self.current
            .extend_from_slice(format!("{{\"seq\":{}}}\n", seq).as_bytes());
        self
    }

    /// Append `count` consecutive record lines starting at `from`.
    pub fn records(mut self, from: u64, count: u64) -> Self {
        for seq in from..from + count {
            self = self.record(seq);
        }
        self
    }

    /// Append a line that does not parse as a record.
    pub fn malformed(mut self) -> Self {
        self.current.extend_from_slice(b"this is not json\n");
        self
    }

    /// Append raw bytes, e.g. a partial line to exercise chunk boundaries.
    pub fn raw(mut self, bytes: &str) -> Self {
        self.current.extend_from_slice(bytes.as_bytes());
        self
    }

    /// Close the current transport chunk; following data arrives in a new
    /// chunk.
    pub fn split(mut self) -> Self {
        if !self.current.is_empty() {
            self.chunks
                .push(Chunk::Data(Bytes::from(std::mem::take(&mut self.current))));
        }
        self
    }

    /// End the script with a transport failure instead of a clean EOF.
    pub fn transport_failure(mut self, message: &str) -> Self {
        self = self.split();
        self.chunks
            .push(Chunk::Fail(io::ErrorKind::ConnectionReset, message.to_string()));
        self
    }

    /// Finish the script.
    pub fn build(self) -> Outcome {
        let this = self.split();
        Outcome::Serve(this.chunks)
    }
}
