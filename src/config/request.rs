//! Stream request identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// A stream request: the endpoint URL plus the identity used as the
/// cache/poll key by the caching/query layer.
///
/// Immutable once a run starts; `start` with a different URL is a new
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRequest(pub Url);

impl StreamRequest {
    /// Create a request for the given endpoint.
    pub fn new(url: Url) -> Self {
        StreamRequest(url)
    }

    /// The endpoint URL.
    pub fn url(&self) -> &Url {
        &self.0
    }

    /// The cache/poll key: hostname plus path.
    ///
    /// Query strings and fragments are deliberately not part of the key, so
    /// re-parameterized requests against the same resource share an entry.
    pub fn poll_key(&self) -> String {
        format!("{}{}", self.0.host_str().unwrap_or(""), self.0.path())
    }
}

impl fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Url> for StreamRequest {
    fn from(url: Url) -> Self {
        StreamRequest(url)
    }
}
