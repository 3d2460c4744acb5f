//! Replay an operation stream against a live cluster.
//!
//! The first message of a restore call picks the source: a URL switches to
//! reading length-framed operations out of that object, an operation means
//! the rest of the call's stream carries operations too. Operations are
//! applied one at a time, in order, each exactly once.
//!
//! Every operation of one call must share the version of the first. Block
//! payloads arrive as consecutive `CreateBlock` chunks closed by an empty
//! one, and are stored once the closing chunk is seen.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use metavault_cluster::ClusterClient;
use metavault_store::{decompressing_reader, ObjectStores, ObjectUrl, RecordReader};
use metavault_types::pfs::{Block, PutBlockRequest};
use metavault_types::{Envelope, OpV1_12, OpVersion, RestoreRequest};
use tokio::sync::mpsc;

use crate::auth::{caller_token, tolerate_expired_token};
use crate::context::CallContext;
use crate::error::{AdminError, Result};
use crate::transport::RestoreServer;
use crate::upgrade::upgrade;

/// Applies operations to one cluster on behalf of one caller.
#[derive(Debug)]
pub struct Restorer<'a> {
    cluster: &'a ClusterClient,
    stores: &'a ObjectStores,
    ctx: &'a CallContext,
    max_record_bytes: u64,
    applied: u64,
    stream_version: Option<OpVersion>,
    pending_block: Option<(Block, BytesMut)>,
}

/// Records read ahead of the operation being applied.
const READ_AHEAD_RECORDS: usize = 64;

impl<'a> Restorer<'a> {
    pub fn new(
        cluster: &'a ClusterClient,
        stores: &'a ObjectStores,
        ctx: &'a CallContext,
        max_record_bytes: u64,
    ) -> Self {
        Self {
            cluster,
            stores,
            ctx,
            max_record_bytes,
            applied: 0,
            stream_version: None,
            pending_block: None,
        }
    }

    /// Operations applied so far.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Read the call's messages and apply the operations they name.
    ///
    /// Returns once the source is exhausted. When the source is a URL,
    /// later stream messages are left for the caller to drain.
    ///
    /// # Errors
    ///
    /// Returns the first transport, decode or apply error.
    pub async fn run(&mut self, server: &mut dyn RestoreServer) -> Result<()> {
        let Some(first) = server.recv().await? else {
            tracing::info!("Restore stream carried no operations");
            return Ok(());
        };
        match first {
            RestoreRequest::Url(url) => self.replay_url(&url).await?,
            RestoreRequest::Op(op) => {
                self.apply(&op).await?;
                self.replay_stream(server).await?;
            }
        }
        self.finish()
    }

    /// Check that the source did not stop inside a block.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidRequest`] if a block was left unclosed.
    pub fn finish(&self) -> Result<()> {
        match &self.pending_block {
            Some((block, _)) => Err(unclosed_block(block)),
            None => Ok(()),
        }
    }

    async fn replay_stream(&mut self, server: &mut dyn RestoreServer) -> Result<()> {
        while let Some(message) = server.recv().await? {
            match message {
                RestoreRequest::Op(op) => self.apply(&op).await?,
                RestoreRequest::Url(url) => {
                    return Err(AdminError::InvalidRequest(format!(
                        "URL {url} may only be sent as the first message"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply every operation stored in the object at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Url`] for an unusable URL, [`AdminError::Store`]
    /// if the dump can't be read, or the first apply error.
    pub async fn replay_url(&mut self, url: &str) -> Result<()> {
        let url = ObjectUrl::parse(url).map_err(AdminError::Url)?;
        self.stores.client_for(&url).map_err(AdminError::Url)?;
        tracing::info!(%url, "Restoring from object");

        let (tx, mut rx) = mpsc::channel(READ_AHEAD_RECORDS);
        let stores = self.stores.clone();
        let max_record_bytes = self.max_record_bytes;
        let reader =
            tokio::task::spawn_blocking(move || read_dump(&stores, &url, max_record_bytes, &tx));
        while let Some(record) = rx.recv().await {
            self.apply(&Envelope::from_bytes(record)).await?;
        }
        reader
            .await
            .map_err(|e| AdminError::Transport(format!("dump reader task failed: {e}")))?
    }

    /// Decode, upgrade and apply one operation.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Envelope`] for an undecodable envelope, or the
    /// handler's error wrapped with what it was doing.
    pub async fn apply(&mut self, envelope: &Envelope) -> Result<()> {
        let op = envelope.decode()?;
        self.check_version(op.version())?;
        let op = upgrade(op);
        tracing::debug!(kind = op.kind(), "Applying operation");
        let op = match op {
            OpV1_12::CreateBlock(chunk) => self.assemble_block(chunk)?,
            other => match &self.pending_block {
                Some((block, _)) => return Err(unclosed_block(block)),
                None => Some(other),
            },
        };
        if let Some(op) = op {
            self.dispatch(op).await?;
        }
        self.applied += 1;
        Ok(())
    }

    fn check_version(&mut self, version: OpVersion) -> Result<()> {
        match self.stream_version {
            None => {
                self.stream_version = Some(version);
                Ok(())
            }
            Some(pinned) if pinned == version => Ok(()),
            Some(pinned) => Err(AdminError::InvalidRequest(format!(
                "cannot mix different operation versions in one restore (found both {version} and {pinned})"
            ))),
        }
    }

    /// Add one block chunk. Returns the whole block once its closing chunk
    /// arrives; a lone empty chunk is an empty block.
    fn assemble_block(&mut self, chunk: PutBlockRequest) -> Result<Option<OpV1_12>> {
        match self.pending_block.take() {
            None if chunk.data.is_empty() => Ok(Some(OpV1_12::CreateBlock(chunk))),
            None => {
                self.pending_block = Some((chunk.block, BytesMut::from(&chunk.data[..])));
                Ok(None)
            }
            Some((block, _)) if block != chunk.block => Err(AdminError::InvalidRequest(format!(
                "block {} was interrupted by block {}",
                block.hash, chunk.block.hash
            ))),
            Some((block, data)) if chunk.data.is_empty() => {
                Ok(Some(OpV1_12::CreateBlock(PutBlockRequest {
                    block,
                    data: data.freeze(),
                })))
            }
            Some((block, mut data)) => {
                data.extend_from_slice(&chunk.data);
                self.pending_block = Some((block, data));
                Ok(None)
            }
        }
    }

    async fn dispatch(&self, op: OpV1_12) -> Result<()> {
        let cluster = self.cluster;
        match op {
            OpV1_12::CreateBlock(req) => cluster
                .objects
                .put_block(req)
                .await
                .map_err(|e| AdminError::cluster("error putting block", e)),
            OpV1_12::CreateObject(req) => cluster
                .objects
                .create_object(req)
                .await
                .map_err(|e| AdminError::cluster("error creating object", e)),
            OpV1_12::TagObject(req) => cluster
                .objects
                .tag_object(req)
                .await
                .map_err(|e| AdminError::cluster("error tagging object", e)),
            OpV1_12::CreateRepo(req) => skip_existing(cluster.pfs.create_repo(req).await)
                .map_err(|e| AdminError::cluster("error creating repo", e)),
            OpV1_12::BuildCommit(mut req) => {
                if req.finished.is_none() {
                    tracing::warn!(commit = %req.commit(), "Commit has no finish time, finishing it now");
                    req.finished = Some(Utc::now());
                }
                skip_existing(cluster.pfs.build_commit(req).await)
                    .map_err(|e| AdminError::cluster("error creating commit", e))
            }
            OpV1_12::CreateBranch(req) => skip_existing(cluster.pfs.create_branch(req).await)
                .map_err(|e| AdminError::cluster("error creating branch", e)),
            OpV1_12::CreatePipeline(req) => skip_existing(cluster.pps.create_pipeline(req).await)
                .map_err(|e| AdminError::cluster("error creating pipeline", e)),
            OpV1_12::CreateJob(req) => skip_existing(cluster.pps.create_job(req).await)
                .map_err(|e| AdminError::cluster("error creating job", e)),
            OpV1_12::ActivateEnterprise(req) => cluster
                .enterprise
                .activate(req)
                .await
                .map_err(|e| AdminError::cluster("error activating enterprise license", e)),
            OpV1_12::CheckAuthToken(_) => caller_token(self.ctx).map(drop),
            OpV1_12::ActivateAuth(_) => {
                let root_token = caller_token(self.ctx)?;
                cluster
                    .auth
                    .activate(root_token)
                    .await
                    .map_err(|e| AdminError::cluster("error activating authentication", e))
            }
            OpV1_12::RestoreAuthToken(req) => {
                tolerate_expired_token(cluster.auth.restore_token(req).await)
                    .map_err(|e| AdminError::cluster("error restoring auth token", e))
            }
            OpV1_12::SetClusterRoleBinding(req) => cluster
                .auth
                .modify_role_binding(req)
                .await
                .map_err(|e| AdminError::cluster("error setting cluster role bindings", e)),
            OpV1_12::SetAuthConfig(req) => cluster
                .auth
                .set_configuration(req)
                .await
                .map_err(|e| AdminError::cluster("error setting authorization config", e)),
            OpV1_12::SetAcl(req) => cluster
                .auth
                .set_acl(req)
                .await
                .map_err(|e| AdminError::cluster("error setting ACL for repo", e)),
        }
    }
}

fn unclosed_block(block: &Block) -> AdminError {
    AdminError::InvalidRequest(format!(
        "block {} ended without its closing operation",
        block.hash
    ))
}

/// Body of the dump reader task: feed every record at `url` into `tx`.
/// Stops early once the receiver is gone.
fn read_dump(
    stores: &ObjectStores,
    url: &ObjectUrl,
    max_record_bytes: u64,
    tx: &mpsc::Sender<Bytes>,
) -> Result<()> {
    let object = stores
        .open_reader(url)
        .map_err(|e| AdminError::store("error opening object for reading", e))?;
    let stream = decompressing_reader(object)
        .map_err(|e| AdminError::store("error opening compressed stream", e))?;
    let mut records = RecordReader::new(stream, max_record_bytes);
    while let Some(record) = records
        .read_record()
        .map_err(|e| AdminError::store("error reading operation from object", e))?
    {
        if tx.blocking_send(record).is_err() {
            break;
        }
    }
    Ok(())
}

/// Treat a fact that is already present as restored.
fn skip_existing<T>(result: metavault_cluster::Result<T>) -> metavault_cluster::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => {
            tracing::debug!(error = %e, "Skipping fact that already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
