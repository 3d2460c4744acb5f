//! Server halves of the extract and restore RPC streams.
//!
//! The traits are what the admin server needs from any RPC framework. The
//! channel-backed implementations connect a client and server in one
//! process.

use async_trait::async_trait;
use metavault_types::{Envelope, RestoreRequest};
use tokio::sync::{mpsc, oneshot};

use crate::error::{AdminError, Result};

/// Outbound half of an extract call.
#[async_trait]
pub trait ExtractServer: Send {
    /// Send one operation to the caller.
    async fn send(&mut self, op: Envelope) -> Result<()>;
}

/// Inbound half of a restore call plus its single acknowledgment.
#[async_trait]
pub trait RestoreServer: Send {
    /// Next message, or `None` once the caller has closed its side.
    async fn recv(&mut self) -> Result<Option<RestoreRequest>>;

    /// Send the empty acknowledgment that ends the call.
    async fn send_and_close(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-process channels
// ---------------------------------------------------------------------------

/// Extract stream backed by a bounded channel.
#[derive(Debug)]
pub struct ChannelExtractServer {
    tx: mpsc::Sender<Envelope>,
}

/// Connected extract server and the receiver the caller reads from.
#[must_use]
pub fn extract_channel(capacity: usize) -> (ChannelExtractServer, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelExtractServer { tx }, rx)
}

#[async_trait]
impl ExtractServer for ChannelExtractServer {
    async fn send(&mut self, op: Envelope) -> Result<()> {
        self.tx
            .send(op)
            .await
            .map_err(|_| AdminError::Transport("extract caller went away".into()))
    }
}

/// Caller side of an in-process restore call.
#[derive(Debug)]
pub struct RestoreClient {
    tx: mpsc::Sender<RestoreRequest>,
    ack: oneshot::Receiver<()>,
}

impl RestoreClient {
    /// Send one restore message.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Transport`] if the server has stopped reading.
    pub async fn send(&self, request: RestoreRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| AdminError::Transport("restore server stopped reading".into()))
    }

    /// Close the send side and wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Transport`] if the call ended without one.
    pub async fn close_and_recv(self) -> Result<()> {
        drop(self.tx);
        self.ack
            .await
            .map_err(|_| AdminError::Transport("restore call ended without acknowledgment".into()))
    }
}

/// Restore stream backed by a bounded channel.
#[derive(Debug)]
pub struct ChannelRestoreServer {
    rx: mpsc::Receiver<RestoreRequest>,
    ack: Option<oneshot::Sender<()>>,
}

/// Connected restore client and server.
#[must_use]
pub fn restore_channel(capacity: usize) -> (RestoreClient, ChannelRestoreServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (ack_tx, ack_rx) = oneshot::channel();
    (
        RestoreClient { tx, ack: ack_rx },
        ChannelRestoreServer {
            rx,
            ack: Some(ack_tx),
        },
    )
}

#[async_trait]
impl RestoreServer for ChannelRestoreServer {
    async fn recv(&mut self) -> Result<Option<RestoreRequest>> {
        Ok(self.rx.recv().await)
    }

    async fn send_and_close(&mut self) -> Result<()> {
        self.rx.close();
        let ack = self
            .ack
            .take()
            .ok_or_else(|| AdminError::Transport("restore call already acknowledged".into()))?;
        ack.send(())
            .map_err(|()| AdminError::Transport("restore caller went away".into()))
    }
}
