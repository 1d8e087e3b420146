//! Wire types for the foreground/background boundary.
//!
//! The foreground proxy and the background fetcher communicate exclusively
//! through these correlation-tagged request/response messages. They carry
//! only copied data, never live references, so the boundary they cross can
//! be a channel, a thread, or a process without changing the protocol.
//!
//! # Message Types
//!
//! - [`Request`]: a correlated [`Command`] (`start`, `status`, `next`,
//!   `destroy`)
//! - [`Response`]: the matching [`Payload`] for exactly one request
//! - [`Batch`]: a bounded, ordered group of records delivered per `next`
//! - [`FetcherStatus`] / [`StatusReport`]: the fetcher's state machine
//!
//! # Example
//!
//! ```
//! use ndstream::protocol::{Command, Request};
//!
//! let req = Request {
//!     id: 7,
//!     command: Command::Start {
//!         url: "https://feed.example/records".into(),
//!     },
//! };
//! let json = serde_json::to_string(&req).unwrap();
//! let parsed: Request = serde_json::from_str(&json).unwrap();
//! assert_eq!(req, parsed);
//! ```

mod batch;
mod messages;

pub use batch::{Batch, FetcherStatus, StatusReport};
pub use messages::{CallId, Command, Payload, Request, Response};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Request>();
        assert_send_sync::<Response<u32>>();
        assert_send_sync::<Batch<String>>();
        assert_send_sync::<FetcherStatus>();
        assert_send_sync::<StatusReport>();
    }

    #[test]
    fn roundtrip_response_with_batch() {
        let original = Response {
            id: 42,
            payload: Payload::Batch(Batch {
                data: vec![1u32, 2, 3],
                more: true,
                skipped: 1,
            }),
        };

        let json = serde_json::to_string(&original).unwrap();
        let parsed: Response<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }
}
