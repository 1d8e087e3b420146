//! Connection seam between the fetcher and the network.

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use url::Url;

use crate::{Error, Result};

/// The raw chunk stream of an open connection.
///
/// Chunk boundaries are arbitrary; the decoder reassembles lines.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Opens a streamed byte source for a URL.
///
/// The fetcher talks to the network only through this trait, so tests can
/// substitute scripted sources and failures.
pub trait Connect: Send + Sync {
    /// Open the stream. Resolves once response headers have arrived.
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<ChunkStream>>;
}

/// Default connector: a streamed HTTP GET for newline-delimited JSON.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Create a connector with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector reusing an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Connect for HttpConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
        let request = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/x-ndjson");
        let url = url.to_string();

        Box::pin(async move {
            let response = request
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|e| Error::connect(&url, io::Error::other(e)))?;

            tracing::debug!(%url, status = %response.status(), "stream opened");

            let chunks = response.bytes_stream().map_err(io::Error::other).boxed();
            Ok(chunks)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn connector_is_usable_as_trait_object() {
        let connector: Arc<dyn Connect> = Arc::new(HttpConnector::new());
        let _ = connector.connect(&Url::parse("http://localhost/feed").unwrap());
    }

    #[tokio::test]
    async fn scripted_connector_yields_chunks() {
        struct Scripted;

        impl Connect for Scripted {
            fn connect(&self, _url: &Url) -> BoxFuture<'static, Result<ChunkStream>> {
                Box::pin(async {
                    let chunks = futures::stream::iter(vec![
                        Ok(Bytes::from_static(b"{\"a\":1}\n")),
                        Ok(Bytes::from_static(b"{\"a\":2}\n")),
                    ])
                    .boxed();
                    Ok(chunks as ChunkStream)
                })
            }
        }

        let url = Url::parse("mock://feed").unwrap();
        let mut stream = Scripted.connect(&url).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"{\"a\":1}\n");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(&second[..], b"{\"a\":2}\n");
        assert!(stream.next().await.is_none());
    }
}
