//! # ndstream
//!
//! Client-side acquisition engine for server-streamed NDJSON record
//! sequences.
//!
//! The engine pulls a large, line-delimited record stream through an
//! isolated background task, groups records into bounded batches, and
//! exposes a pull-based, poll-driven interface to a foreground consumer:
//! - A line decoder that is independent of transport chunking
//! - A background fetcher with its own status state machine and
//!   backpressure on the transfer
//! - A proxy that makes the fetcher callable like a local object over a
//!   correlated message protocol
//! - A controller that owns the growing record sink and a stable
//!   consumer-facing status
//!
//! ## Quick Start
//!
//! ```ignore
//! use ndstream::{Result, StreamController};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller: StreamController<serde_json::Value> = StreamController::builder()
//!         .endpoint("https://feed.example/records")
//!         .build()?;
//!
//!     if controller.start(None).await {
//!         while controller.status() != ndstream::ConsumerStatus::Done {
//!             controller.poll().await;
//!             tokio::time::sleep(controller.poll_interval().unwrap()).await;
//!         }
//!     }
//!     println!("{} records", controller.sink_len());
//!     Ok(())
//! }
//! ```
//!
//! ## Observation
//!
//! ```ignore
//! use ndstream::{LoggingObserver, StreamController};
//! use std::sync::Arc;
//!
//! let controller: StreamController<serde_json::Value> = StreamController::builder()
//!     .endpoint("https://feed.example/records")
//!     .observer(Arc::new(LoggingObserver::new()))
//!     .build()?;
//! ```

pub mod config;
mod controller;
mod decode;
mod error;
mod observer;
pub mod protocol;
pub mod worker;

pub use error::{Error, Result};

// Re-export the main controller types at crate root
pub use controller::{ConsumerStatus, ErrorRecord, StreamController, StreamControllerBuilder};

// Re-export commonly used config types at crate root
pub use config::{StreamConfig, StreamConfigBuilder, StreamRequest};

// Re-export commonly used protocol types at crate root
pub use protocol::{Batch, FetcherStatus, StatusReport};

// Re-export the observer seam and the decoder at crate root
pub use decode::{Decoded, NdJsonDecoder};
pub use observer::{LogLevel, LoggingObserver, StreamObserver};

// Re-export the transport seam at crate root
pub use worker::{ChunkStream, Connect, HttpConnector, StreamProxy};
