//! Destinations for extracted operations.
//!
//! An extract writes either back over its own RPC stream
//! ([`StreamSink`]) or into one compressed object named by a URL
//! ([`UrlSink`]). The extractor only sees [`OpSink`].

use std::io::{self, Write};

use async_trait::async_trait;
use metavault_store::{
    CompressedWriter, ObjectStores, ObjectUrl, ObjectWriter, RecordWriter, StoreError,
};
use metavault_types::Envelope;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::types::{CompressionConfig, LimitsConfig};
use crate::error::{AdminError, Result};
use crate::transport::ExtractServer;

/// Ordered destination for extracted operations.
#[async_trait]
pub trait OpSink: Send {
    /// Deliver one operation. Operations arrive in emission order.
    async fn write(&mut self, op: Envelope) -> Result<()>;

    /// Flush and seal the destination. Called once, after the last write
    /// and whether or not the extract succeeded. Further calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output can't be made durable.
    async fn finish(&mut self) -> Result<()>;

    /// Operations delivered so far.
    fn written(&self) -> u64;
}

// ---------------------------------------------------------------------------
// RPC stream
// ---------------------------------------------------------------------------

/// Sends each operation back to the caller as it is produced.
pub struct StreamSink<'a> {
    server: &'a mut dyn ExtractServer,
    written: u64,
}

impl<'a> StreamSink<'a> {
    pub fn new(server: &'a mut dyn ExtractServer) -> Self {
        Self { server, written: 0 }
    }
}

#[async_trait]
impl OpSink for StreamSink<'_> {
    async fn write(&mut self, op: Envelope) -> Result<()> {
        self.server.send(op).await?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

// ---------------------------------------------------------------------------
// Object URL
// ---------------------------------------------------------------------------

type DumpWriter = RecordWriter<CompressedWriter<PendingObject>>;

enum DumpCommand {
    Record(Envelope),
    Finish,
}

/// Writes length-framed operations into a compressed object.
///
/// Framing, compression and object I/O run on a blocking task fed over a
/// bounded channel. The object is published by [`finish`](OpSink::finish);
/// a sink dropped before that leaves nothing behind.
pub struct UrlSink {
    url: ObjectUrl,
    max_record_bytes: u64,
    tx: Option<mpsc::Sender<DumpCommand>>,
    task: Option<JoinHandle<Result<()>>>,
    written: u64,
}

impl UrlSink {
    /// Open the object named by `url` for writing. Records larger than
    /// `limits.max_record_bytes` are refused, since a restore with the same
    /// limits could not read them back.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Url`] for a malformed URL or an unserved
    /// scheme, and [`AdminError::Store`] if the object can't be opened.
    pub fn create(
        stores: &ObjectStores,
        url: &str,
        compression: &CompressionConfig,
        limits: &LimitsConfig,
    ) -> Result<Self> {
        let url = ObjectUrl::parse(url).map_err(AdminError::Url)?;
        stores.client_for(&url).map_err(AdminError::Url)?;
        let object = stores
            .open_writer(&url)
            .map_err(|e| AdminError::store("error opening object for writing", e))?;
        let compressed = CompressedWriter::new(
            PendingObject(Some(object)),
            compression.codec,
            compression.zstd_level,
        )
        .map_err(|e| AdminError::store("error starting compressed stream", e))?;
        tracing::debug!(%url, codec = %compression.codec, "opened dump for writing");

        let (tx, rx) = mpsc::channel(WRITE_AHEAD_RECORDS);
        let writer = RecordWriter::new(compressed);
        let task = tokio::task::spawn_blocking(move || write_dump(writer, rx));
        Ok(Self {
            url,
            max_record_bytes: limits.max_record_bytes,
            tx: Some(tx),
            task: Some(task),
            written: 0,
        })
    }

    #[must_use]
    pub fn url(&self) -> &ObjectUrl {
        &self.url
    }

    /// Wait for the writer task and return its outcome.
    async fn join(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| AdminError::Transport(format!("dump writer task failed: {e}")))?
    }
}

/// Operations buffered between the extractor and the writer task.
const WRITE_AHEAD_RECORDS: usize = 64;

#[async_trait]
impl OpSink for UrlSink {
    async fn write(&mut self, op: Envelope) -> Result<()> {
        let len = op.as_bytes().len() as u64;
        if len > self.max_record_bytes {
            return Err(AdminError::store(
                "error writing operation to object",
                StoreError::RecordTooLarge {
                    len,
                    max: self.max_record_bytes,
                },
            ));
        }
        let Some(tx) = &self.tx else {
            return Err(AdminError::InvalidRequest(format!(
                "dump {} is already closed",
                self.url
            )));
        };
        if tx.send(DumpCommand::Record(op)).await.is_err() {
            // The writer task stopped on an error; report that error.
            self.tx = None;
            self.join().await?;
            return Err(AdminError::Transport(format!(
                "dump writer for {} stopped",
                self.url
            )));
        }
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return self.join().await;
        };
        // A send failure means the task already stopped; join reports why.
        let _ = tx.send(DumpCommand::Finish).await;
        drop(tx);
        self.join().await?;
        tracing::debug!(url = %self.url, records = self.written, "dump published");
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

/// Body of the writer task. Returns once the dump is published, a write
/// fails, or the sink goes away without finishing.
fn write_dump(mut writer: DumpWriter, mut rx: mpsc::Receiver<DumpCommand>) -> Result<()> {
    while let Some(command) = rx.blocking_recv() {
        match command {
            DumpCommand::Record(op) => writer
                .write_record(op.as_bytes())
                .map_err(|e| AdminError::store("error writing operation to object", e))?,
            DumpCommand::Finish => return seal(writer),
        }
    }
    Ok(())
}

/// Close the compression layer, then publish the object. If the
/// compression layer fails the object is aborted instead.
fn seal(writer: DumpWriter) -> Result<()> {
    let object = writer
        .into_inner()
        .finish()
        .map_err(|e| AdminError::store("error finishing compressed stream", e))?;
    object
        .close()
        .map_err(|e| AdminError::store("error closing object", e))
}

/// Object handle that is aborted on drop unless it was closed.
struct PendingObject(Option<Box<dyn ObjectWriter>>);

impl PendingObject {
    fn close(mut self) -> metavault_store::Result<()> {
        match self.0.take() {
            Some(object) => object.close(),
            None => Ok(()),
        }
    }

    fn object(&mut self) -> io::Result<&mut Box<dyn ObjectWriter>> {
        self.0
            .as_mut()
            .ok_or_else(|| io::Error::other("object already closed"))
    }
}

impl Write for PendingObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.object()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.object()?.flush()
    }
}

impl Drop for PendingObject {
    fn drop(&mut self) {
        if let Some(object) = self.0.take() {
            tracing::debug!("discarding unpublished dump");
            object.abort();
        }
    }
}
