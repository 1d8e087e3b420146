//! Foreground proxy for the background stream fetcher.
//!
//! [`StreamProxy`] exposes `start`/`status`/`next`/`destroy` as asynchronous
//! calls that behave as if the fetcher were local, while every call actually
//! crosses the isolation boundary as a correlated message. A registry of
//! pending calls matches responses to callers; if the background task
//! terminates, every pending call is rejected promptly — a pending `next`
//! never hangs forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use super::fetcher::run_worker;
use super::source::Connect;
use crate::config::StreamConfig;
use crate::protocol::{Batch, CallId, Command, Payload, Request, Response, StatusReport};
use crate::{Error, Result};

type Pending<T> = Arc<Mutex<HashMap<CallId, oneshot::Sender<Payload<T>>>>>;

/// Handle to a background stream fetcher.
///
/// One proxy owns exactly one fetcher task. Dropping the proxy tears the
/// task down; calling [`destroy`](Self::destroy) does so explicitly and
/// is idempotent.
pub struct StreamProxy<T> {
    cmd_tx: mpsc::UnboundedSender<Request>,
    pending: Pending<T>,
    next_id: AtomicU64,
    worker: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl<T> StreamProxy<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Spawn a fetcher task and the response dispatcher for it.
    pub fn spawn(config: Arc<StreamConfig>, connector: Arc<dyn Connect>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_worker::<T>(config, connector, cmd_rx, resp_tx));

        let pending: Pending<T> = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch(resp_rx, Arc::clone(&pending)));

        Self {
            cmd_tx,
            pending,
            next_id: AtomicU64::new(0),
            worker,
            dispatcher,
        }
    }

    /// Ask the fetcher to open the stream.
    pub async fn start(&self, url: &Url) -> Result<()> {
        match self
            .call(Command::Start {
                url: url.to_string(),
            })
            .await?
        {
            Payload::Started => Ok(()),
            Payload::Error { message } => Err(Error::Fetcher { message }),
            _ => Err(Error::UnexpectedResponse { expected: "started" }),
        }
    }

    /// Fetch the current status. No side effects.
    pub async fn status(&self) -> Result<StatusReport> {
        match self.call(Command::Status).await? {
            Payload::Status(report) => Ok(report),
            Payload::Error { message } => Err(Error::Fetcher { message }),
            _ => Err(Error::UnexpectedResponse { expected: "status" }),
        }
    }

    /// Dequeue the oldest unread batch. Non-blocking at the fetcher: an
    /// empty open batch means "nothing new yet", a terminal batch means the
    /// run is over.
    pub async fn next(&self) -> Result<Batch<T>> {
        match self.call(Command::Next).await? {
            Payload::Batch(batch) => Ok(batch),
            Payload::Error { message } => Err(Error::Fetcher { message }),
            _ => Err(Error::UnexpectedResponse { expected: "batch" }),
        }
    }

    /// Tear down the fetcher: abort the connection, discard unread batches,
    /// and release the background task. Safe to call more than once.
    pub async fn destroy(&self) -> Result<()> {
        match self.call(Command::Destroy).await {
            Ok(Payload::Destroyed) => Ok(()),
            Ok(Payload::Error { message }) => Err(Error::Fetcher { message }),
            Ok(_) => Err(Error::UnexpectedResponse {
                expected: "destroyed",
            }),
            // Already gone counts as destroyed.
            Err(Error::WorkerTerminated) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Send one correlated request and await its response.
    async fn call(&self, command: Command) -> Result<Payload<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        // Register before sending so a fast response always finds its caller.
        self.pending.lock().expect("pending registry").insert(id, tx);

        let request = Request { id, command };
        tracing::trace!(id, cmd = request.command.name(), "proxy call");
        if self.cmd_tx.send(request).is_err() {
            self.pending.lock().expect("pending registry").remove(&id);
            return Err(Error::WorkerTerminated);
        }

        // The sender is dropped when the dispatcher rejects all pending
        // calls on worker termination.
        rx.await.map_err(|_| Error::WorkerTerminated)
    }
}

impl<T> Drop for StreamProxy<T> {
    fn drop(&mut self) {
        // Closing cmd_tx (dropped with self) ends the worker loop; aborting
        // is the backstop for a worker stuck mid-connect.
        self.worker.abort();
        self.dispatcher.abort();
        self.pending.lock().expect("pending registry").clear();
    }
}

/// Resolve correlated responses until the worker side closes, then reject
/// every call still pending.
async fn dispatch<T>(mut resp_rx: mpsc::UnboundedReceiver<Response<T>>, pending: Pending<T>) {
    while let Some(response) = resp_rx.recv().await {
        let waiter = pending
            .lock()
            .expect("pending registry")
            .remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.payload);
            }
            None => {
                tracing::warn!(id = response.id, "uncorrelated response dropped");
            }
        }
    }
    // Dropping the senders rejects the callers.
    pending.lock().expect("pending registry").clear();
    tracing::debug!("dispatcher finished");
}
