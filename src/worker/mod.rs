//! Background stream fetcher and its foreground proxy.
//!
//! The fetcher runs in an isolated background task that owns the network
//! connection; the proxy is the foreground handle that marshals correlated
//! requests to it. All interaction crosses the boundary as message passing,
//! never shared state.

mod fetcher;
mod proxy;
mod source;

pub use proxy::StreamProxy;
pub use source::{ChunkStream, Connect, HttpConnector};

pub(crate) use fetcher::run_worker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<StreamProxy<u32>>();
        assert_send_sync::<HttpConnector>();
        assert_send_sync::<dyn Connect>();
    }
}
