//! Poll-driven consumer controller.
//!
//! [`StreamController`] turns the low-level batch/status primitives of the
//! background fetcher into a stable data-accumulation service: it owns the
//! growing record sink, derives a consumer-facing status, accumulates
//! reportable errors, and exposes `start`/`pause`/`resume`/`stop`/`clean`
//! operations to external collaborators.
//!
//! Failures never panic out of the controller. Operations report success
//! through their return value and append [`ErrorRecord`]s for anything a
//! caller might want to render.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::config::{StreamConfig, StreamConfigBuilder, StreamRequest};
use crate::observer::StreamObserver;
use crate::protocol::FetcherStatus;
use crate::worker::{Connect, HttpConnector, StreamProxy};
use crate::{Error, Result};

/// Status surfaced to external collaborators.
///
/// Derived from the fetcher's status plus local pause state. This is the
/// only status the presentation and caching layers ever see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// No run is active.
    #[default]
    Stopped,
    /// A run is active but polling is suspended.
    Paused,
    /// A run is active and polling.
    Running,
    /// The stream drained completely.
    Done,
    /// The run failed.
    Error,
}

impl ConsumerStatus {
    /// Derive the consumer status from the fetcher's status and the local
    /// pause flag.
    pub fn derive(fetcher: FetcherStatus, paused: bool) -> Self {
        if paused {
            return ConsumerStatus::Paused;
        }
        match fetcher {
            FetcherStatus::Unknown | FetcherStatus::Idle => ConsumerStatus::Stopped,
            FetcherStatus::Running => ConsumerStatus::Running,
            FetcherStatus::Done => ConsumerStatus::Done,
            FetcherStatus::Error => ConsumerStatus::Error,
        }
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerStatus::Stopped => "stopped",
            ConsumerStatus::Paused => "paused",
            ConsumerStatus::Running => "running",
            ConsumerStatus::Done => "done",
            ConsumerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A reportable failure accumulated by the controller.
///
/// Error records are independent from [`ConsumerStatus`]: a record can be
/// raised for a transient problem (a skipped malformed line) without
/// flipping the overall status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Monotonic identity, unique within one controller.
    pub id: u64,
    /// Human-readable description.
    pub message: String,
    /// Underlying cause, when one exists.
    pub cause: Option<String>,
}

// Everything mutated on the poll path. Held only across synchronous
// sections, never across an await.
struct State<T> {
    sink: Vec<T>,
    status: ConsumerStatus,
    fetcher_status: FetcherStatus,
    poll_interval: Option<Duration>,
    request: Option<StreamRequest>,
    errors: Vec<ErrorRecord>,
    next_error_id: u64,
}

impl<T> State<T> {
    fn push_error(&mut self, message: String, cause: Option<String>) {
        let id = self.next_error_id;
        self.next_error_id += 1;
        tracing::warn!(error_id = id, message = %message, "controller error");
        self.errors.push(ErrorRecord { id, message, cause });
    }
}

/// Poll-driven streaming consumer.
///
/// Owns at most one live background fetcher at a time. The record sink is
/// owned exclusively by the controller and reset only on [`start`] or
/// [`clean`].
///
/// [`start`]: StreamController::start
/// [`clean`]: StreamController::clean
///
/// # Example
///
/// ```no_run
/// use ndstream::StreamController;
///
/// # async fn run() -> ndstream::Result<()> {
/// let controller: StreamController<serde_json::Value> = StreamController::builder()
///     .endpoint("https://feed.example/records")
///     .batch_max_records(50)
///     .build()?;
///
/// if controller.start(None).await {
///     while controller.poll().await {
///         // records accumulate in controller.records()
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamController<T> {
    config: Arc<StreamConfig>,
    connector: Arc<dyn Connect>,
    initial: Vec<T>,
    state: Mutex<State<T>>,
    // Also the poll gate: `poll` uses try_lock so a scheduled poll is
    // skipped while the previous one is still settling.
    proxy: AsyncMutex<Option<StreamProxy<T>>>,
}

impl<T> StreamController<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    /// Create a builder for a controller.
    pub fn builder() -> StreamControllerBuilder<T> {
        StreamControllerBuilder::new()
    }

    /// Create a controller from an existing configuration.
    pub fn with_config(config: StreamConfig) -> Self {
        Self::assemble(config, Vec::new())
    }

    fn assemble(config: StreamConfig, initial: Vec<T>) -> Self {
        let connector: Arc<dyn Connect> = config
            .connector
            .clone()
            .unwrap_or_else(|| Arc::new(HttpConnector::new()));
        let sink = initial.clone();
        Self {
            config: Arc::new(config),
            connector,
            initial,
            state: Mutex::new(State {
                sink,
                status: ConsumerStatus::Stopped,
                fetcher_status: FetcherStatus::Unknown,
                poll_interval: None,
                request: None,
                errors: Vec::new(),
                next_error_id: 0,
            }),
            proxy: AsyncMutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start a new run against `url`, or against the configured endpoint
    /// when `url` is `None`.
    ///
    /// Any prior run is fully torn down first, and the sink is reset to its
    /// initial content. Returns `false` (with an [`ErrorRecord`] appended
    /// and the status unchanged) if no endpoint is available or the stream
    /// cannot be opened.
    pub async fn start(&self, url: Option<Url>) -> bool {
        let mut slot = self.proxy.lock().await;

        // One live fetcher per controller.
        if let Some(old) = slot.take() {
            if let Err(e) = old.destroy().await {
                tracing::debug!(error = %e, "teardown of prior run failed");
            }
        }

        let url = match url.or_else(|| self.config.endpoint.clone()) {
            Some(url) => url,
            None => {
                let mut state = self.lock_state();
                state.push_error("no endpoint configured".into(), None);
                return false;
            }
        };
        let request = StreamRequest::new(url);

        {
            let mut state = self.lock_state();
            state.sink = self.initial.clone();
            state.fetcher_status = FetcherStatus::Unknown;
        }

        let proxy = StreamProxy::spawn(Arc::clone(&self.config), Arc::clone(&self.connector));
        match proxy.start(request.url()).await {
            Ok(()) => {
                tracing::info!(url = %request, "stream started");
                *slot = Some(proxy);
                let mut state = self.lock_state();
                state.request = Some(request);
                state.status = ConsumerStatus::Running;
                state.fetcher_status = FetcherStatus::Running;
                state.poll_interval = Some(self.config.fetch_interval);
                true
            }
            Err(e) => {
                // No run was established; drop the fresh worker too and
                // leave the status as it was.
                if let Err(destroy_err) = proxy.destroy().await {
                    tracing::debug!(error = %destroy_err, "teardown of failed start");
                }
                self.record_failure(format!("failed to start stream: {e}"), Some(e), false);
                false
            }
        }
    }

    /// Execute one poll step.
    ///
    /// Rejects (returns `false`, no sink mutation) when no run is active,
    /// when a previous poll has not settled yet, or when the fetcher is not
    /// in a pollable state. Otherwise fetches the next batch and appends
    /// its records to the sink in order. A terminal batch moves the status
    /// to `Done` and slows the advertised poll interval to the rest
    /// interval.
    pub async fn poll(&self) -> bool {
        // Skip overlapping polls so sink appends stay strictly ordered.
        let slot = match self.proxy.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                tracing::trace!("previous poll still in flight, skipping");
                return false;
            }
        };
        let proxy = match slot.as_ref() {
            Some(proxy) => proxy,
            None => return false,
        };

        let report = match proxy.status().await {
            Ok(report) => report,
            Err(e) => {
                self.record_failure(format!("status check failed: {e}"), Some(e), true);
                return false;
            }
        };
        self.lock_state().fetcher_status = report.status;

        if report.status == FetcherStatus::Error {
            // Report the run failure once, not on every scheduled poll.
            let mut state = self.lock_state();
            if state.status != ConsumerStatus::Error {
                let detail = report
                    .detail
                    .unwrap_or_else(|| "stream failed".to_string());
                state.push_error(detail.clone(), None);
                state.status = ConsumerStatus::Error;
                drop(state);
                self.notify_error(&detail, true);
            }
            return false;
        }
        if !report.status.is_pollable() {
            return false;
        }

        let batch = match proxy.next().await {
            Ok(batch) => batch,
            Err(e) => {
                self.record_failure(format!("poll failed: {e}"), Some(e), true);
                return false;
            }
        };

        if batch.skipped > 0 {
            // Recovered locally; reported without flipping the status.
            let message = format!("{} malformed record(s) skipped", batch.skipped);
            self.lock_state().push_error(message.clone(), None);
            self.notify_error(&message, false);
        }

        let appended = batch.data.len();
        let terminal = batch.is_terminal();
        let total = {
            let mut state = self.lock_state();
            state.sink.extend(batch.data);
            if terminal {
                state.status = ConsumerStatus::Done;
                state.poll_interval = Some(self.config.rest_interval);
            }
            state.sink.len()
        };
        if appended > 0 {
            tracing::debug!(appended, total, "batch appended");
            if let Some(observer) = self.config.observer() {
                observer.on_batch_appended(appended, total);
            }
        }
        true
    }

    /// Suspend polling. Refuses unless currently `Running`.
    pub fn pause(&self) -> bool {
        let mut state = self.lock_state();
        if state.status != ConsumerStatus::Running {
            return false;
        }
        state.status = ConsumerStatus::Paused;
        state.poll_interval = None;
        true
    }

    /// Resume a paused run at the active fetch interval. Refuses unless
    /// currently `Paused`.
    pub fn resume(&self) -> bool {
        let mut state = self.lock_state();
        if state.status != ConsumerStatus::Paused {
            return false;
        }
        state.status = ConsumerStatus::Running;
        state.poll_interval = Some(self.config.fetch_interval);
        true
    }

    /// Tear down the active run.
    ///
    /// On success the status becomes `Stopped` and polling is suspended.
    /// With no active run this is a successful no-op. Any cached data keyed
    /// by the run's poll key is invalidated through the observer either
    /// way.
    pub async fn stop(&self) -> bool {
        let mut slot = self.proxy.lock().await;
        let poll_key = self.lock_state().request.as_ref().map(|r| r.poll_key());

        let ok = match slot.take() {
            None => true,
            Some(proxy) => match proxy.destroy().await {
                Ok(()) => true,
                Err(e) => {
                    self.record_failure(format!("failed to stop stream: {e}"), Some(e), true);
                    false
                }
            },
        };

        if ok {
            let mut state = self.lock_state();
            state.status = ConsumerStatus::Stopped;
            state.fetcher_status = FetcherStatus::Unknown;
            state.poll_interval = None;
            state.request = None;
        }
        if let Some(key) = poll_key {
            tracing::debug!(poll_key = %key, "invalidating cached run data");
            if let Some(observer) = self.config.observer() {
                observer.on_invalidate(&key);
            }
        }
        ok
    }

    /// Reset the sink to its initial content without touching the run.
    pub fn clean(&self) -> bool {
        let mut state = self.lock_state();
        state.sink = self.initial.clone();
        true
    }

    // -------------------------------------------------------------------------
    // Error list
    // -------------------------------------------------------------------------

    /// Remove one error record by id. Returns whether it existed.
    pub fn resolve_error(&self, id: u64) -> bool {
        let mut state = self.lock_state();
        let before = state.errors.len();
        state.errors.retain(|e| e.id != id);
        state.errors.len() < before
    }

    /// Clear the entire error list.
    pub fn resolve_all_errors(&self) {
        self.lock_state().errors.clear();
    }

    // -------------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------------

    /// Snapshot of the accumulated records, in arrival order.
    pub fn records(&self) -> Vec<T> {
        self.lock_state().sink.clone()
    }

    /// Number of accumulated records.
    pub fn sink_len(&self) -> usize {
        self.lock_state().sink.len()
    }

    /// Current consumer-facing status.
    pub fn status(&self) -> ConsumerStatus {
        self.lock_state().status
    }

    /// Last observed fetcher status.
    pub fn fetcher_status(&self) -> FetcherStatus {
        self.lock_state().fetcher_status
    }

    /// Advertised poll period. `None` means polling is suspended.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.lock_state().poll_interval
    }

    /// Snapshot of the outstanding error records.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.lock_state().errors.clone()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State<T>> {
        // Lock holders never panic while holding the guard.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_failure(&self, message: String, cause: Option<Error>, terminal: bool) {
        let mut state = self.lock_state();
        state.push_error(message.clone(), cause.map(|e| e.to_string()));
        if terminal && state.status != ConsumerStatus::Stopped {
            state.status = ConsumerStatus::Error;
        }
        drop(state);
        self.notify_error(&message, terminal);
    }

    fn notify_error(&self, message: &str, terminal: bool) {
        if let Some(observer) = self.config.observer() {
            observer.on_error(message, terminal);
        }
    }
}

impl<T> fmt::Debug for StreamController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StreamController`].
///
/// Wraps [`StreamConfigBuilder`] and adds controller-only settings such as
/// the initial sink content.
pub struct StreamControllerBuilder<T> {
    config: StreamConfigBuilder,
    initial: Vec<T>,
}

impl<T> StreamControllerBuilder<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    fn new() -> Self {
        Self {
            config: StreamConfigBuilder::default(),
            initial: Vec::new(),
        }
    }

    /// Set the default stream endpoint.
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Self {
        self.config = self.config.endpoint(url);
        self
    }

    /// Records per batch before the fetcher closes it for delivery.
    pub fn batch_max_records(mut self, records: usize) -> Self {
        self.config = self.config.batch_max_records(records);
        self
    }

    /// Longest a partially filled batch waits before being closed.
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.batch_flush_interval(interval);
        self
    }

    /// Unread batches retained before the fetcher suspends reading.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.queue_capacity(capacity);
        self
    }

    /// Poll period advertised while the stream is live.
    pub fn fetch_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.fetch_interval(interval);
        self
    }

    /// Poll period advertised once the stream has drained.
    pub fn rest_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.rest_interval(interval);
        self
    }

    /// Bound on opening the streamed response.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Replace the HTTP connector.
    pub fn connector(mut self, connector: Arc<dyn Connect>) -> Self {
        self.config = self.config.connector(connector);
        self
    }

    /// Set an observer for stream lifecycle events.
    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.config = self.config.observer(observer);
        self
    }

    /// Seed the sink. `start` and `clean` reset back to this content.
    pub fn initial_records(mut self, records: Vec<T>) -> Self {
        self.initial = records;
        self
    }

    /// Build the controller, validating the configuration.
    pub fn build(self) -> Result<StreamController<T>> {
        let config = self.config.build()?;
        Ok(StreamController::assemble(config, self.initial))
    }
}
