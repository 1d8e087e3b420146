use std::time::Duration;

/// Errors that can occur when using ndstream.
///
/// Errors are organized by category:
/// - Connection errors: the stream could not be opened
/// - Transport errors: the stream dropped mid-run
/// - Decode errors: a single malformed record (recovered at the decoder)
/// - Protocol errors: the background fetcher terminated or misbehaved
/// - Runtime errors: failures during execution
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Configuration errors (detected at build() time)
    // -------------------------------------------------------------------------
    /// Invalid configuration provided to the builder.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // -------------------------------------------------------------------------
    // Connection errors
    // -------------------------------------------------------------------------
    /// The streamed HTTP response could not be opened.
    #[error("failed to open stream at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// The configured endpoint is missing or not a valid URL.
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    // -------------------------------------------------------------------------
    // Transport errors
    // -------------------------------------------------------------------------
    /// The connection dropped while the stream was being read.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Decode errors
    // -------------------------------------------------------------------------
    /// A line of the stream failed to parse as JSON.
    ///
    /// The fetcher recovers from this locally by skipping the record;
    /// it surfaces only through [`Batch::skipped`](crate::Batch::skipped).
    #[error("failed to parse record: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // -------------------------------------------------------------------------
    // Protocol errors
    // -------------------------------------------------------------------------
    /// The background fetcher terminated before answering a pending call.
    #[error("background fetcher terminated unexpectedly")]
    WorkerTerminated,

    /// A correlated response arrived with the wrong payload kind.
    #[error("unexpected response payload (expected {expected})")]
    UnexpectedResponse { expected: &'static str },

    /// The fetcher rejected a command.
    #[error("fetcher error: {message}")]
    Fetcher { message: String },

    // -------------------------------------------------------------------------
    // Runtime errors
    // -------------------------------------------------------------------------
    /// A request exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// A specialized Result type for ndstream operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a JSON parse error with the offending line excerpt as context.
    pub fn json_parse(source: serde_json::Error, raw: &str) -> Self {
        Self::JsonParse {
            message: format!(
                "at column {}: {}",
                source.column(),
                raw.chars().take(100).collect::<String>()
            ),
            source,
        }
    }

    /// Create a connection failure for the given URL.
    pub fn connect(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            url: url.into(),
            source,
        }
    }

    /// Check if this error recovers locally without ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::JsonParse { .. })
    }

    /// Check if this error means the background context is gone.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::WorkerTerminated)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }

    #[test]
    fn recoverable_detection() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        assert!(Error::json_parse(json_err, "{bad").is_recoverable());
        assert!(!Error::WorkerTerminated.is_recoverable());
        assert!(!Error::Timeout(Duration::from_secs(30)).is_recoverable());
    }

    #[test]
    fn terminated_detection() {
        assert!(Error::WorkerTerminated.is_terminated());
        assert!(!Error::Transport(std::io::Error::other("reset")).is_terminated());
    }

    #[test]
    fn json_parse_truncates_long_lines() {
        let raw = format!("{}{}", "x", "y".repeat(500));
        let json_err = serde_json::from_str::<serde_json::Value>(&raw).unwrap_err();
        let err = Error::json_parse(json_err, &raw);
        if let Error::JsonParse { message, .. } = &err {
            assert!(message.len() < 150);
        } else {
            panic!("expected JsonParse");
        }
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::JsonParse { .. }));
    }

    #[test]
    fn question_mark_operator_io() {
        fn fallible_io() -> Result<()> {
            let _file = std::fs::File::open("/nonexistent/path/that/does/not/exist")?;
            Ok(())
        }
        let result = fallible_io();
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn connect_carries_url() {
        let err = Error::connect("http://host/feed", std::io::Error::other("refused"));
        assert!(err.to_string().contains("http://host/feed"));
    }
}
