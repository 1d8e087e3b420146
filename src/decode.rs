//! Incremental NDJSON line decoder.
//!
//! This module provides [`NdJsonDecoder`], a [`tokio_util::codec::Decoder`]
//! that turns a chunked byte stream into one decoded record per complete
//! line. Chunk boundaries may fall anywhere, including in the middle of a
//! line; the incomplete tail is carried over until the terminator arrives.
//!
//! A line that fails to decode yields [`Decoded::Skipped`] and decoding
//! continues with the next line. A single malformed record never aborts the
//! stream. A stream that does not end in a line terminator is not an error;
//! the trailing line is flushed at end of stream.

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use tokio_util::codec::Decoder;

use crate::{Error, Result};

/// One frame produced by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A successfully decoded record.
    Record(T),
    /// A line that failed to decode and was skipped.
    Skipped {
        /// 1-based line number within the stream.
        line: u64,
        /// Parse failure description.
        message: String,
    },
}

impl<T> Decoded<T> {
    /// Get the record if this frame decoded successfully.
    pub fn record(self) -> Option<T> {
        match self {
            Decoded::Record(record) => Some(record),
            Decoded::Skipped { .. } => None,
        }
    }
}

/// Decoder for newline-delimited JSON records.
///
/// Empty lines are ignored. Lines may end in `\n` or `\r\n`.
pub struct NdJsonDecoder<T> {
    line_no: u64,
    _record: PhantomData<fn() -> T>,
}

impl<T> NdJsonDecoder<T> {
    /// Create a new decoder positioned at the start of a stream.
    pub fn new() -> Self {
        Self {
            line_no: 0,
            _record: PhantomData,
        }
    }

    /// Number of lines consumed so far, including skipped and blank ones.
    pub fn lines_seen(&self) -> u64 {
        self.line_no
    }
}

impl<T> Default for NdJsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> NdJsonDecoder<T> {
    /// Parse one complete line into a frame.
    ///
    /// Returns `None` for blank lines.
    fn parse_line(&mut self, line: &[u8]) -> Option<Decoded<T>> {
        self.line_no += 1;

        // Tolerate CRLF terminators and surrounding whitespace.
        let trimmed = trim_line(line);
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_slice::<T>(trimmed) {
            Ok(record) => Some(Decoded::Record(record)),
            Err(source) => {
                let raw = String::from_utf8_lossy(trimmed);
                let err = Error::json_parse(source, &raw);
                tracing::debug!(line = self.line_no, %err, "skipping malformed record");
                Some(Decoded::Skipped {
                    line: self.line_no,
                    message: err.to_string(),
                })
            }
        }
    }
}

impl<T: DeserializeOwned> Decoder for NdJsonDecoder<T> {
    type Item = Decoded<T>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(pos) = src.iter().position(|&b| b == b'\n') {
            let line = src.split_to(pos + 1);
            if let Some(frame) = self.parse_line(&line[..pos]) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // Flush a trailing line that never saw its terminator.
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(self.parse_line(&line))
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &line[s..=e],
        _ => &[],
    }
}
