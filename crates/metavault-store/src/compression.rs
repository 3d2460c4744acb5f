//! Streaming compression around dump bytes.
//!
//! Writers pick a codec up front. Readers detect it from the first four
//! bytes of the stream, so a restore never needs to be told which codec a
//! dump was written with.

use std::io::{self, Cursor, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
pub use metavault_types::compression::CompressionCodec;

use crate::error::{Result, StoreError};

/// Frame magic of a zstd stream (little-endian `0xFD2FB528`).
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Frame magic of an LZ4 frame stream (little-endian `0x184D2204`).
pub const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// Default zstd level for dumps.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Identify the codec of a stream from its leading bytes.
#[must_use]
pub fn sniff_codec(header: [u8; 4]) -> Option<CompressionCodec> {
    match header {
        ZSTD_MAGIC => Some(CompressionCodec::Zstd),
        LZ4_MAGIC => Some(CompressionCodec::Lz4),
        _ => None,
    }
}

/// Compressing writer over `W`.
///
/// `flush` pushes everything written so far through the compression
/// framing. [`finish`](Self::finish) writes the frame trailer and returns
/// the inner writer; dropping without finishing leaves the stream truncated.
pub enum CompressedWriter<W: Write> {
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Lz4(FrameEncoder<W>),
}

impl<W: Write> CompressedWriter<W> {
    /// Start a compressed stream over `inner`. `zstd_level` is ignored for
    /// lz4.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the zstd context can't be created.
    pub fn new(inner: W, codec: CompressionCodec, zstd_level: i32) -> Result<Self> {
        Ok(match codec {
            CompressionCodec::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(inner, zstd_level)?),
            CompressionCodec::Lz4 => Self::Lz4(FrameEncoder::new(inner)),
        })
    }

    #[must_use]
    pub fn codec(&self) -> CompressionCodec {
        match self {
            Self::Zstd(_) => CompressionCodec::Zstd,
            Self::Lz4(_) => CompressionCodec::Lz4,
        }
    }

    /// Close the compressed stream and hand back the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer can't be written.
    pub fn finish(self) -> Result<W> {
        match self {
            Self::Zstd(encoder) => Ok(encoder.finish()?),
            Self::Lz4(encoder) => Ok(encoder.finish()?),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Zstd(encoder) => encoder.write(buf),
            Self::Lz4(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Zstd(encoder) => encoder.flush(),
            Self::Lz4(encoder) => encoder.flush(),
        }
    }
}

/// Wrap `inner` in the decompressor its leading magic bytes call for.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the header can't be read (an empty stream
/// included) and [`StoreError::UnknownCodec`] for an unrecognized header.
pub fn decompressing_reader<R>(mut inner: R) -> Result<Box<dyn Read + Send>>
where
    R: Read + Send + 'static,
{
    let mut header = [0u8; 4];
    inner.read_exact(&mut header)?;
    let codec = sniff_codec(header).ok_or(StoreError::UnknownCodec(header))?;
    tracing::debug!(%codec, "detected dump compression");
    let stream = Cursor::new(header).chain(inner);
    Ok(match codec {
        CompressionCodec::Zstd => Box::new(zstd::stream::read::Decoder::new(stream)?),
        CompressionCodec::Lz4 => Box::new(FrameDecoder::new(stream)),
    })
}
