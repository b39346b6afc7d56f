//! Line framing for the tool-server stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! so an unterminated or runaway line from a misbehaving tool server cannot
//! exhaust memory. The stream may be delivered in arbitrary chunks; partial
//! lines are buffered until their `\n` terminator arrives.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the tool server: 1 MiB.
///
/// Inbound lines exceeding this limit cause [`LineCodec::decode`] to return
/// [`AppError::Protocol`] with `"line too long"`. The offending line is
/// dropped; subsequent well-formed lines continue to decode.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 framing for the tool-server streams.
///
/// Each `\n`-terminated string is one complete wire envelope. Decoding
/// enforces [`MAX_LINE_BYTES`]; encoding appends the terminator and applies
/// no length limit.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no terminator yet (buffering).
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final, possibly unterminated line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] onto the crate error taxonomy.
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
