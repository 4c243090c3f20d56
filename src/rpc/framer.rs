//! Newline-delimited JSON framing for child process output.
//!
//! The child writes one JSON value per line, but its stdout arrives in
//! arbitrary chunks. [`JsonLinesCodec`] layers JSON decoding over
//! [`LinesCodec`], which keeps the unterminated tail between chunks and
//! skips over-long lines up to their next newline. [`LineFramer`] drives
//! the codec from pushed chunks, [`frame_stream`] from an [`AsyncRead`].

use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};

use super::BridgeError;

/// Longest line accepted from the child: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// Initial read buffer for the child's stdout.
pub const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Decodes one JSON value per line.
///
/// Blank lines are skipped silently. Lines that are too long, not UTF-8, or
/// not JSON are logged and skipped; decoding never fails.
#[derive(Debug)]
pub struct JsonLinesCodec {
    lines: LinesCodec,
    max_line_bytes: usize,
    malformed: u64,
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLinesCodec {
    /// Create a codec with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec that drops lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        let max_line_bytes = max_line_bytes.max(1);
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
            malformed: 0,
        }
    }

    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Number of lines dropped because they could not be decoded.
    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Forget any partial or discarded line state.
    pub fn reset(&mut self) {
        self.lines = LinesCodec::new_with_max_length(self.max_line_bytes);
    }

    fn report(&mut self, err: &BridgeError, raw: Option<&str>) {
        self.malformed = self.malformed.saturating_add(1);
        match raw {
            Some(raw) => tracing::warn!(error = %err, raw, "Dropping malformed line from child"),
            None => tracing::warn!(error = %err, "Dropping malformed line from child"),
        }
    }
}

impl Decoder for JsonLinesCodec {
    type Item = Value;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Self::Error> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    let err = BridgeError::MalformedUpstreamMessage(format!(
                        "line exceeds {} bytes",
                        self.max_line_bytes
                    ));
                    self.report(&err, None);
                    continue;
                }
                Err(LinesCodecError::Io(e)) => {
                    self.report(&BridgeError::MalformedUpstreamMessage(e.to_string()), None);
                    continue;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    self.report(
                        &BridgeError::MalformedUpstreamMessage(e.to_string()),
                        Some(line),
                    );
                }
            }
        }
    }

    /// An unterminated trailing line at EOF is discarded.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Self::Error> {
        let value = self.decode(src)?;
        if value.is_none() && !src.is_empty() {
            tracing::debug!(
                bytes = src.len(),
                "Discarding unterminated line at end of stream"
            );
            src.clear();
        }
        Ok(value)
    }
}

/// Incremental newline-delimited JSON decoder fed by pushed chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Bytes not yet decoded, including the unterminated tail.
    buffer: BytesMut,
    codec: JsonLinesCodec,
}

impl LineFramer {
    /// Create a framer with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer that drops lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec: JsonLinesCodec::with_max_line_bytes(max_line_bytes),
        }
    }

    /// Append a chunk and iterate over the values it completes.
    ///
    /// Values are produced on demand. Lines left unread when the iterator is
    /// dropped stay buffered and come out first on the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { framer: self }
    }

    /// Number of bytes not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines dropped because they could not be decoded.
    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.codec.malformed_count()
    }

    /// Forget any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec.reset();
    }
}

/// Lazy sequence of values completed by one [`LineFramer::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Frames<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let LineFramer { buffer, codec } = &mut *self.framer;
        codec.decode(buffer).ok().flatten()
    }
}

/// Decode every value read from `reader`, in order, until EOF or a read
/// error.
pub fn frame_stream<R>(
    reader: R,
    codec: JsonLinesCodec,
) -> impl futures_core::Stream<Item = Value> + Send
where
    R: AsyncRead + Send,
{
    FramedRead::with_capacity(reader, codec, READ_CHUNK_BYTES).filter_map(|frame| {
        futures_util::future::ready(match frame {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read child output");
                None
            }
        })
    })
}
