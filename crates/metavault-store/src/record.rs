//! Length-prefixed record framing.
//!
//! Each record is a 4-byte big-endian payload length followed by the
//! payload.

use std::io::{self, Read, Write};

use bytes::Bytes;

use crate::error::{Result, StoreError};

const HEADER_LEN: usize = 4;

/// Default ceiling on a single record read back from a dump.
pub const DEFAULT_MAX_RECORD_BYTES: u64 = 64 * 1024 * 1024;

/// Writes one framed record per call and flushes it through `W`.
pub struct RecordWriter<W: Write> {
    inner: W,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, records: 0 }
    }

    /// Frame and write `payload`, then flush.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordTooLarge`] if the payload length does not
    /// fit the header, or [`StoreError::Io`] on write failure.
    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| StoreError::RecordTooLarge {
            len: payload.len() as u64,
            max: u64::from(u32::MAX),
        })?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads framed records until a clean end of stream.
pub struct RecordReader<R: Read> {
    inner: R,
    max_record_bytes: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, max_record_bytes: u64) -> Self {
        Self {
            inner,
            max_record_bytes,
        }
    }

    /// Next record, or `None` at a record boundary end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Truncated`] if the stream ends inside a record,
    /// [`StoreError::RecordTooLarge`] if the header exceeds the limit, or
    /// [`StoreError::Io`] on read failure.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(StoreError::Truncated {
                expected: HEADER_LEN as u64,
                actual: got as u64,
            });
        }
        let len = u64::from(u32::from_be_bytes(header));
        if len > self.max_record_bytes {
            return Err(StoreError::RecordTooLarge {
                len,
                max: self.max_record_bytes,
            });
        }
        let mut payload = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
        let got = read_full(&mut self.inner, &mut payload)?;
        if (got as u64) < len {
            return Err(StoreError::Truncated {
                expected: len,
                actual: got as u64,
            });
        }
        Ok(Some(Bytes::from(payload)))
    }
}

/// Fill `buf` as far as the stream allows, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
