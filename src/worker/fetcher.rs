//! The background stream fetcher task.
//!
//! One fetcher task is spawned per run. It owns the network connection,
//! drives the line decoder, groups records into batches, and answers the
//! correlated commands sent by [`StreamProxy`](super::StreamProxy). It
//! shares no memory with the foreground.
//!
//! State machine: `Unknown → Running → {Done | Error}`, plus the terminal
//! teardown triggered by `destroy` or by the proxy being dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use url::Url;

use super::source::{ChunkStream, Connect};
use crate::config::StreamConfig;
use crate::decode::{Decoded, NdJsonDecoder};
use crate::protocol::{Batch, Command, FetcherStatus, Payload, Request, Response, StatusReport};
use crate::{Error, Result};

type Frames<T> = FramedRead<StreamReader<ChunkStream, Bytes>, NdJsonDecoder<T>>;

/// Entry point for the background task.
pub(crate) async fn run_worker<T>(
    config: Arc<StreamConfig>,
    connector: Arc<dyn Connect>,
    cmd_rx: mpsc::UnboundedReceiver<Request>,
    resp_tx: mpsc::UnboundedSender<Response<T>>,
) where
    T: DeserializeOwned + Send + 'static,
{
    let fetcher = Fetcher {
        config,
        connector,
        resp_tx,
        status: FetcherStatus::Unknown,
        detail: None,
        queue: VecDeque::new(),
        open: Vec::new(),
        skipped: 0,
    };
    fetcher.run(cmd_rx).await;
    tracing::debug!("fetcher task finished");
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Stop,
}

struct Fetcher<T> {
    config: Arc<StreamConfig>,
    connector: Arc<dyn Connect>,
    resp_tx: mpsc::UnboundedSender<Response<T>>,
    status: FetcherStatus,
    /// Failure description once `status` is `Error`.
    detail: Option<String>,
    /// Closed batches awaiting `next`, oldest first.
    queue: VecDeque<Batch<T>>,
    /// Records of the batch currently being filled.
    open: Vec<T>,
    /// Malformed lines skipped since the last closed batch.
    skipped: u64,
}

impl<T: DeserializeOwned + Send + 'static> Fetcher<T> {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Request>) {
        // The connection is held here, not in the struct, so dropping it on
        // teardown is a plain assignment.
        let mut frames: Option<Frames<T>> = None;

        let mut flush = interval(self.config.batch_flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Backpressure: while the queue is at capacity the body is not
            // polled, which suspends the transfer until `next` frees a slot.
            let can_read =
                frames.is_some() && self.queue.len() < self.config.queue_capacity;
            let flush_due = can_read && !self.open.is_empty();

            tokio::select! {
                req = cmd_rx.recv() => {
                    match req {
                        // Proxy dropped without destroy; tear down anyway.
                        None => break,
                        Some(req) => {
                            if self.handle(req, &mut frames).await == Flow::Stop {
                                break;
                            }
                        }
                    }
                }
                frame = read_frame(&mut frames), if can_read => {
                    match frame {
                        Some(Ok(decoded)) => {
                            let was_empty = self.open.is_empty();
                            self.on_decoded(decoded);
                            // The flush clock measures from the first record
                            // of the open batch, not from task start.
                            if was_empty && !self.open.is_empty() {
                                flush.reset();
                            }
                        }
                        Some(Err(err)) => {
                            frames = None;
                            self.on_stream_error(err);
                        }
                        None => {
                            frames = None;
                            self.on_stream_end();
                        }
                    }
                }
                _ = flush.tick(), if flush_due => {
                    self.close_open_batch();
                }
            }
        }
    }

    async fn handle(&mut self, req: Request, frames: &mut Option<Frames<T>>) -> Flow {
        tracing::trace!(id = req.id, cmd = req.command.name(), "fetcher command");
        match req.command {
            Command::Start { url } => {
                let payload = match self.open_stream(&url, frames).await {
                    Ok(()) => Payload::Started,
                    Err(err) => {
                        self.status = FetcherStatus::Error;
                        self.detail = Some(err.to_string());
                        tracing::warn!(%url, %err, "stream start failed");
                        Payload::Error {
                            message: err.to_string(),
                        }
                    }
                };
                self.reply(req.id, payload);
                Flow::Continue
            }
            Command::Status => {
                self.reply(
                    req.id,
                    Payload::Status(StatusReport {
                        status: self.status,
                        detail: self.detail.clone(),
                    }),
                );
                Flow::Continue
            }
            Command::Next => {
                let batch = self.next_batch();
                self.reply(req.id, Payload::Batch(batch));
                Flow::Continue
            }
            Command::Destroy => {
                // Dropping the frames drops the response body, aborting the
                // connection. Idempotency lives at the proxy: a second
                // destroy finds the task gone and treats that as success.
                *frames = None;
                self.queue.clear();
                self.open.clear();
                self.skipped = 0;
                tracing::debug!("fetcher destroyed");
                self.reply(req.id, Payload::Destroyed);
                Flow::Stop
            }
        }
    }

    /// Open the streamed response, bounded by the request timeout.
    async fn open_stream(&mut self, url: &str, frames: &mut Option<Frames<T>>) -> Result<()> {
        // One run per fetcher; a new run means a new task.
        if self.status != FetcherStatus::Unknown {
            return Err(Error::Fetcher {
                message: "fetcher already started".into(),
            });
        }

        let url = Url::parse(url).map_err(|e| Error::InvalidEndpoint(e.to_string()))?;
        let chunks = timeout(self.config.request_timeout, self.connector.connect(&url))
            .await
            .map_err(|_| Error::Timeout(self.config.request_timeout))??;

        *frames = Some(FramedRead::new(
            StreamReader::new(chunks),
            NdJsonDecoder::new(),
        ));
        self.status = FetcherStatus::Running;
        Ok(())
    }

    /// Dequeue the oldest unread batch; never blocks.
    fn next_batch(&mut self) -> Batch<T> {
        if let Some(batch) = self.queue.pop_front() {
            return batch;
        }
        if self.status == FetcherStatus::Done {
            Batch::terminal()
        } else {
            Batch::pending()
        }
    }

    fn on_decoded(&mut self, decoded: Decoded<T>) {
        match decoded {
            Decoded::Record(record) => {
                self.open.push(record);
                if self.open.len() >= self.config.batch_max_records {
                    self.close_open_batch();
                }
            }
            Decoded::Skipped { .. } => {
                self.skipped += 1;
            }
        }
    }

    fn on_stream_end(&mut self) {
        self.close_open_batch();
        self.status = FetcherStatus::Done;
        tracing::debug!(queued = self.queue.len(), "stream exhausted");
    }

    fn on_stream_error(&mut self, err: Error) {
        // Already-decoded records stay deliverable; only reading stops.
        self.close_open_batch();
        self.status = FetcherStatus::Error;
        self.detail = Some(err.to_string());
        tracing::warn!(%err, "stream transport failed");
    }

    fn close_open_batch(&mut self) {
        if self.open.is_empty() && self.skipped == 0 {
            return;
        }
        let batch = Batch::open(
            std::mem::take(&mut self.open),
            std::mem::take(&mut self.skipped),
        );
        tracing::trace!(records = batch.len(), skipped = batch.skipped, "batch closed");
        self.queue.push_back(batch);
    }

    fn reply(&self, id: u64, payload: Payload<T>) {
        if self.resp_tx.send(Response { id, payload }).is_err() {
            tracing::debug!(id, "response dropped: foreground gone");
        }
    }
}

async fn read_frame<T: DeserializeOwned>(
    frames: &mut Option<Frames<T>>,
) -> Option<Result<Decoded<T>>> {
    match frames {
        Some(f) => f.next().await,
        // Disabled by the select guard; never polled without a stream.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    use futures::future::BoxFuture;

    #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
    struct Row {
        seq: u64,
    }

    /// Connector replaying a fixed byte script, or failing to connect.
    struct Replay {
        chunks: Vec<io::Result<Bytes>>,
    }

    impl Replay {
        fn lines(count: u64) -> Self {
            let body: String = (0..count).map(|seq| format!("{{\"seq\":{}}}\n", seq)).collect();
            Self {
                chunks: vec![Ok(Bytes::from(body))],
            }
        }
    }

    impl Connect for Replay {
        fn connect(&self, _url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
            let chunks: Vec<io::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                })
                .collect();
            Box::pin(async move {
                Ok(futures::stream::iter(chunks).boxed() as ChunkStream)
            })
        }
    }

    struct Refused;

    impl Connect for Refused {
        fn connect(&self, url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
            let url = url.to_string();
            Box::pin(async move {
                Err(Error::connect(
                    &url,
                    io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                ))
            })
        }
    }

    struct Harness {
        cmd_tx: mpsc::UnboundedSender<Request>,
        resp_rx: mpsc::UnboundedReceiver<Response<Row>>,
        next_id: u64,
    }

    impl Harness {
        fn spawn(config: StreamConfig, connector: impl Connect + 'static) -> Self {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let (resp_tx, resp_rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker::<Row>(
                Arc::new(config),
                Arc::new(connector),
                cmd_rx,
                resp_tx,
            ));
            Self {
                cmd_tx,
                resp_rx,
                next_id: 0,
            }
        }

        async fn call(&mut self, command: Command) -> Payload<Row> {
            self.next_id += 1;
            self.cmd_tx
                .send(Request {
                    id: self.next_id,
                    command,
                })
                .expect("worker alive");
            let resp = self.resp_rx.recv().await.expect("response");
            assert_eq!(resp.id, self.next_id, "correlation id must match");
            resp.payload
        }

        async fn status(&mut self) -> StatusReport {
            match self.call(Command::Status).await {
                Payload::Status(report) => report,
                other => panic!("expected status, got {}", other.name()),
            }
        }

        async fn next(&mut self) -> Batch<Row> {
            match self.call(Command::Next).await {
                Payload::Batch(batch) => batch,
                other => panic!("expected batch, got {}", other.name()),
            }
        }

        /// Poll `next` until the terminal batch, collecting every record.
        async fn drain(&mut self) -> Vec<Row> {
            let mut rows = Vec::new();
            for _ in 0..1000 {
                let batch = self.next().await;
                let terminal = batch.is_terminal();
                rows.extend(batch.data);
                if terminal {
                    return rows;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("stream never terminated");
        }
    }

    fn test_config(batch_max_records: usize) -> StreamConfig {
        StreamConfig::builder()
            .batch_max_records(batch_max_records)
            // Long flush interval so tests exercise the count threshold only.
            .batch_flush_interval(Duration::from_secs(3600))
            .queue_capacity(4)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn status_is_unknown_before_start() {
        let mut h = Harness::spawn(test_config(10), Replay::lines(0));
        assert_eq!(h.status().await.status, FetcherStatus::Unknown);
    }

    #[tokio::test]
    async fn drains_all_records_in_order() {
        let mut h = Harness::spawn(test_config(7), Replay::lines(23));
        assert!(matches!(
            h.call(Command::Start {
                url: "mock://feed/rows".into()
            })
            .await,
            Payload::Started
        ));
        assert_eq!(h.status().await.status, FetcherStatus::Running);

        let rows = h.drain().await;
        assert_eq!(rows.len(), 23);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.seq, i as u64);
        }
        assert_eq!(h.status().await.status, FetcherStatus::Done);
    }

    #[tokio::test]
    async fn batches_close_at_count_threshold() {
        let mut h = Harness::spawn(test_config(5), Replay::lines(12));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;

        let mut sizes = Vec::new();
        for _ in 0..1000 {
            let batch = h.next().await;
            if !batch.is_empty() {
                sizes.push(batch.len());
            }
            if batch.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_on_time() {
        // Stream stays open after delivering two records, so only the flush
        // interval can close the batch.
        struct OpenEnded(&'static str);

        impl Connect for OpenEnded {
            fn connect(&self, _url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
                let body = Bytes::from_static(self.0.as_bytes());
                Box::pin(async move {
                    let chunks = futures::stream::iter(vec![io::Result::Ok(body)])
                        .chain(futures::stream::pending());
                    Ok(chunks.boxed() as ChunkStream)
                })
            }
        }

        let config = StreamConfig::builder()
            .batch_max_records(100)
            .batch_flush_interval(Duration::from_millis(200))
            .queue_capacity(4)
            .build()
            .unwrap();
        let mut h = Harness::spawn(config, OpenEnded("{\"seq\":0}\n{\"seq\":1}\n"));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;

        let mut flushed = None;
        for _ in 0..1000 {
            let batch = h.next().await;
            if !batch.is_empty() {
                flushed = Some(batch);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let batch = flushed.expect("flush interval never closed the batch");
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_terminal());
        assert_eq!(h.status().await.status, FetcherStatus::Running);
    }

    #[tokio::test]
    async fn terminal_is_monotonic() {
        let mut h = Harness::spawn(test_config(10), Replay::lines(3));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;
        let _ = h.drain().await;

        // Once terminal, every further next stays terminal and empty.
        for _ in 0..3 {
            let batch = h.next().await;
            assert!(batch.is_terminal());
            assert!(batch.is_empty());
        }
    }

    #[tokio::test]
    async fn empty_stream_terminates_immediately() {
        let mut h = Harness::spawn(test_config(10), Replay::lines(0));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;
        let rows = h.drain().await;
        assert!(rows.is_empty());
        assert_eq!(h.status().await.status, FetcherStatus::Done);
    }

    #[tokio::test]
    async fn connect_failure_reports_error() {
        let mut h = Harness::spawn(test_config(10), Refused);
        let payload = h
            .call(Command::Start {
                url: "mock://feed".into(),
            })
            .await;
        assert!(matches!(payload, Payload::Error { .. }));

        let report = h.status().await;
        assert_eq!(report.status, FetcherStatus::Error);
        assert!(report.detail.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn malformed_lines_count_as_skipped() {
        let body = "{\"seq\":0}\ngarbage\n{\"seq\":1}\n";
        let connector = Replay {
            chunks: vec![Ok(Bytes::from(body))],
        };
        let mut h = Harness::spawn(test_config(100), connector);
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;

        let mut rows = 0;
        let mut skipped = 0;
        for _ in 0..1000 {
            let batch = h.next().await;
            rows += batch.len();
            skipped += batch.skipped;
            if batch.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(rows, 2);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn transport_failure_keeps_decoded_records() {
        let connector = Replay {
            chunks: vec![
                Ok(Bytes::from("{\"seq\":0}\n{\"seq\":1}\n")),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            ],
        };
        let mut h = Harness::spawn(test_config(100), connector);
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;

        // Wait for the failure to land.
        for _ in 0..1000 {
            if h.status().await.status == FetcherStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let report = h.status().await;
        assert_eq!(report.status, FetcherStatus::Error);
        assert!(report.detail.unwrap().contains("reset"));

        let batch = h.next().await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn destroy_discards_queue_and_stops() {
        let mut h = Harness::spawn(test_config(1), Replay::lines(8));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;
        assert!(matches!(
            h.call(Command::Destroy).await,
            Payload::Destroyed
        ));

        // The task is gone; further sends fail.
        let send = h.cmd_tx.send(Request {
            id: 99,
            command: Command::Status,
        });
        // The channel may close a beat after the reply; poll for it.
        if send.is_ok() {
            for _ in 0..1000 {
                if h.cmd_tx.is_closed() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        assert!(h.cmd_tx.is_closed());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut h = Harness::spawn(test_config(10), Replay::lines(2));
        h.call(Command::Start {
            url: "mock://feed".into(),
        })
        .await;
        let payload = h
            .call(Command::Start {
                url: "mock://feed".into(),
            })
            .await;
        assert!(matches!(payload, Payload::Error { .. }));
    }
}
