//! Configuration for the streaming acquisition engine.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ndstream::config::StreamConfig;
//!
//! let config = StreamConfig::builder()
//!     .endpoint("https://feed.example/records")
//!     .batch_max_records(50)
//!     .batch_flush_interval(Duration::from_millis(250))
//!     .fetch_interval(Duration::from_millis(500))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.batch_max_records(), 50);
//! ```

mod builder;
mod request;

pub use builder::{StreamConfig, StreamConfigBuilder};
pub use request::StreamRequest;
