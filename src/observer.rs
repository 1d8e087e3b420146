//! Stream observer trait and implementations.

/// Observer for streaming lifecycle events.
///
/// Implementations receive callbacks as the controller appends records,
/// surfaces errors, and stops a run. Useful for wiring the engine to a
/// cache layer or a metrics sink without coupling either to the
/// controller.
///
/// # Implementation Notes
///
/// - Implementations must be lightweight; callbacks run on the poll path.
/// - Methods have default empty implementations for selective observation.
///
/// # Example
///
/// ```ignore
/// use ndstream::StreamObserver;
///
/// struct CountingObserver {
///     appended: std::sync::atomic::AtomicUsize,
/// }
///
/// impl StreamObserver for CountingObserver {
///     fn on_batch_appended(&self, count: usize, total: usize) {
///         self.appended.fetch_add(count, std::sync::atomic::Ordering::Relaxed);
///         let _ = total;
///     }
/// }
/// ```
pub trait StreamObserver: Send + Sync {
    /// Called after a batch of records is appended to the sink.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of records in the appended batch
    /// * `total` - Sink size after the append
    fn on_batch_appended(&self, count: usize, total: usize) {
        let _ = (count, total);
    }

    /// Called when the controller records an error.
    ///
    /// Both terminal failures and recoverable ones (skipped records) are
    /// reported here; `terminal` distinguishes them.
    fn on_error(&self, message: &str, terminal: bool) {
        let _ = (message, terminal);
    }

    /// Called when a run is stopped and downstream caches keyed by
    /// `poll_key` should be invalidated.
    fn on_invalidate(&self, poll_key: &str) {
        let _ = poll_key;
    }
}

/// Simple observer that logs stream events using tracing.
///
/// # Example
///
/// ```ignore
/// use ndstream::{LoggingObserver, StreamController};
/// use std::sync::Arc;
///
/// let controller: StreamController<serde_json::Value> = StreamController::builder()
///     .observer(Arc::new(LoggingObserver::new()))
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver {
    level: LogLevel,
}

/// Log level for LoggingObserver.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogLevel {
    /// Log at trace level.
    Trace,
    /// Log at debug level (default).
    #[default]
    Debug,
    /// Log at info level.
    Info,
}

impl LoggingObserver {
    /// Create a new logging observer with debug level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging observer with a specific level.
    pub fn with_level(level: LogLevel) -> Self {
        Self { level }
    }
}

impl StreamObserver for LoggingObserver {
    fn on_batch_appended(&self, count: usize, total: usize) {
        match self.level {
            LogLevel::Trace => tracing::trace!(count, total, "batch_appended"),
            LogLevel::Debug => tracing::debug!(count, total, "batch_appended"),
            LogLevel::Info => tracing::info!(count, total, "batch_appended"),
        }
    }

    fn on_error(&self, message: &str, terminal: bool) {
        // Errors always log at warn regardless of the configured level.
        tracing::warn!(message = %message, terminal, "stream_error");
    }

    fn on_invalidate(&self, poll_key: &str) {
        match self.level {
            LogLevel::Trace => tracing::trace!(poll_key = %poll_key, "invalidate"),
            LogLevel::Debug => tracing::debug!(poll_key = %poll_key, "invalidate"),
            LogLevel::Info => tracing::info!(poll_key = %poll_key, "invalidate"),
        }
    }
}
