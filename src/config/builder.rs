//! Stream configuration and builder.
//!
//! The builder validates thresholds and intervals when
//! [`build()`](StreamConfigBuilder::build) is called, so a misconfigured
//! controller fails before any run starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::observer::StreamObserver;
use crate::worker::Connect;
use crate::{Error, Result};

/// Configuration for a streaming run.
///
/// Use [`StreamConfig::builder()`] to create one.
#[derive(Clone)]
pub struct StreamConfig {
    // Endpoint
    pub(crate) endpoint: Option<Url>,

    // Batching
    pub(crate) batch_max_records: usize,
    pub(crate) batch_flush_interval: Duration,
    pub(crate) queue_capacity: usize,

    // Polling
    pub(crate) fetch_interval: Duration,
    pub(crate) rest_interval: Duration,

    // Network
    pub(crate) request_timeout: Duration,
    pub(crate) connector: Option<Arc<dyn Connect>>,

    // Collaboration
    pub(crate) observer: Option<Arc<dyn StreamObserver>>,
}

impl StreamConfig {
    /// Create a new builder with default settings.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Get the configured endpoint if set.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Records per batch before the batch is closed.
    pub fn batch_max_records(&self) -> usize {
        self.batch_max_records
    }

    /// Longest a partially filled batch waits before being closed.
    pub fn batch_flush_interval(&self) -> Duration {
        self.batch_flush_interval
    }

    /// Unread batches retained before reads are suspended.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Poll period while the stream is live.
    pub fn fetch_interval(&self) -> Duration {
        self.fetch_interval
    }

    /// Poll period once the stream has drained.
    pub fn rest_interval(&self) -> Duration {
        self.rest_interval
    }

    /// Bound on opening the streamed response.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Get the observer if set.
    pub fn observer(&self) -> Option<&Arc<dyn StreamObserver>> {
        self.observer.as_ref()
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("endpoint", &self.endpoint)
            .field("batch_max_records", &self.batch_max_records)
            .field("batch_flush_interval", &self.batch_flush_interval)
            .field("queue_capacity", &self.queue_capacity)
            .field("fetch_interval", &self.fetch_interval)
            .field("rest_interval", &self.rest_interval)
            .field("request_timeout", &self.request_timeout)
            .field("connector", &self.connector.as_ref().map(|_| "<custom>"))
            .field("observer", &self.observer.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Builder for [`StreamConfig`].
#[derive(Clone)]
pub struct StreamConfigBuilder {
    endpoint: Option<Url>,
    endpoint_err: Option<String>,
    batch_max_records: usize,
    batch_flush_interval: Duration,
    queue_capacity: usize,
    fetch_interval: Duration,
    rest_interval: Duration,
    request_timeout: Duration,
    connector: Option<Arc<dyn Connect>>,
    observer: Option<Arc<dyn StreamObserver>>,
}

impl Default for StreamConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_err: None,
            batch_max_records: 100,
            batch_flush_interval: Duration::from_millis(250),
            queue_capacity: 8,
            fetch_interval: Duration::from_millis(500),
            rest_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            connector: None,
            observer: None,
        }
    }
}

impl StreamConfigBuilder {
    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------

    /// Set the default stream endpoint.
    ///
    /// `start` accepts an explicit URL; this is the fallback when it is
    /// called without one. Invalid URLs are reported at `build()`.
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Self {
        match Url::parse(url.as_ref()) {
            Ok(parsed) => self.endpoint = Some(parsed),
            Err(e) => self.endpoint_err = Some(format!("{}: {}", url.as_ref(), e)),
        }
        self
    }

    /// Set the default stream endpoint from an already parsed URL.
    pub fn endpoint_url(mut self, url: Url) -> Self {
        self.endpoint = Some(url);
        self
    }

    // -------------------------------------------------------------------------
    // Batching
    // -------------------------------------------------------------------------

    /// Records per batch before the fetcher closes it for delivery.
    pub fn batch_max_records(mut self, records: usize) -> Self {
        self.batch_max_records = records;
        self
    }

    /// Longest a partially filled batch waits before being closed, bounding
    /// worst-case delivery latency.
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.batch_flush_interval = interval;
        self
    }

    /// Unread batches retained before the fetcher suspends reading
    /// (backpressure bound).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    /// Poll period advertised while the stream is live.
    pub fn fetch_interval(mut self, interval: Duration) -> Self {
        self.fetch_interval = interval;
        self
    }

    /// Poll period advertised once the stream has drained.
    pub fn rest_interval(mut self, interval: Duration) -> Self {
        self.rest_interval = interval;
        self
    }

    // -------------------------------------------------------------------------
    // Network
    // -------------------------------------------------------------------------

    /// Bound on opening the streamed response.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replace the HTTP connector, e.g. with a scripted source in tests.
    pub fn connector(mut self, connector: Arc<dyn Connect>) -> Self {
        self.connector = Some(connector);
        self
    }

    // -------------------------------------------------------------------------
    // Collaboration
    // -------------------------------------------------------------------------

    /// Set an observer for batch, error, and cache-invalidation events.
    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the configuration, validating thresholds and intervals.
    pub fn build(self) -> Result<StreamConfig> {
        if let Some(err) = self.endpoint_err {
            return Err(Error::InvalidConfig(format!("bad endpoint {}", err)));
        }
        if self.batch_max_records == 0 {
            return Err(Error::InvalidConfig(
                "batch_max_records must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.batch_flush_interval.is_zero() || self.fetch_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "intervals must be non-zero".into(),
            ));
        }

        Ok(StreamConfig {
            endpoint: self.endpoint,
            batch_max_records: self.batch_max_records,
            batch_flush_interval: self.batch_flush_interval,
            queue_capacity: self.queue_capacity,
            fetch_interval: self.fetch_interval,
            rest_interval: self.rest_interval,
            request_timeout: self.request_timeout,
            connector: self.connector,
            observer: self.observer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = StreamConfig::builder().build().unwrap();
        assert_eq!(config.batch_max_records(), 100);
        assert_eq!(config.queue_capacity(), 8);
        assert!(config.endpoint().is_none());
    }

    #[test]
    fn builder_chains_options() {
        let config = StreamConfig::builder()
            .endpoint("https://feed.example/records")
            .batch_max_records(50)
            .batch_flush_interval(Duration::from_millis(100))
            .queue_capacity(2)
            .fetch_interval(Duration::from_millis(200))
            .rest_interval(Duration::from_secs(60))
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(config.batch_max_records(), 50);
        assert_eq!(config.queue_capacity(), 2);
        assert_eq!(config.fetch_interval(), Duration::from_millis(200));
        assert_eq!(config.rest_interval(), Duration::from_secs(60));
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "https://feed.example/records"
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = StreamConfig::builder().batch_max_records(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let result = StreamConfig::builder().queue_capacity(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn invalid_endpoint_is_rejected_at_build() {
        let result = StreamConfig::builder().endpoint("not a url").build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = StreamConfig::builder()
            .fetch_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn debug_does_not_require_debug_connector() {
        let config = StreamConfig::builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("batch_max_records"));
    }
}
