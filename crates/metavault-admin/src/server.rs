//! The admin service: extract and restore calls.

use std::time::Instant;

use metavault_cluster::ClusterClient;
use metavault_store::ObjectStores;
use metavault_types::pps::Pipeline;
use metavault_types::{Envelope, ExtractRequest, RestoreRequest};

use crate::auth::authorize;
use crate::config::AdminConfig;
use crate::context::CallContext;
use crate::error::{AdminError, Result};
use crate::extract::Extractor;
use crate::restore::Restorer;
use crate::sink::{OpSink, StreamSink, UrlSink};
use crate::transport::{extract_channel, restore_channel, ExtractServer, RestoreServer};

/// Serves extract and restore calls for one cluster.
///
/// Holds no per-call state; calls may run concurrently.
#[derive(Debug, Clone)]
pub struct AdminServer {
    cluster: ClusterClient,
    stores: ObjectStores,
    config: AdminConfig,
}

impl AdminServer {
    /// Server over `cluster`, with object stores taken from `config`.
    #[must_use]
    pub fn new(cluster: ClusterClient, config: AdminConfig) -> Self {
        let stores = config.object_stores();
        Self {
            cluster,
            stores,
            config,
        }
    }

    /// Replace the object stores URLs resolve against.
    #[must_use]
    pub fn with_object_stores(mut self, stores: ObjectStores) -> Self {
        self.stores = stores;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Stream the cluster's state to the caller, or into the object named
    /// by `request.url`. Returns the number of operations written.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotAuthorized`] for a non-admin caller on a
    /// cluster with auth, otherwise the first error of any phase.
    pub async fn extract(
        &self,
        ctx: &CallContext,
        request: &ExtractRequest,
        server: &mut dyn ExtractServer,
    ) -> Result<u64> {
        let start = Instant::now();
        tracing::info!(
            url = request.destination().unwrap_or_default(),
            no_objects = request.no_objects,
            no_repos = request.no_repos,
            no_pipelines = request.no_pipelines,
            no_enterprise = request.no_enterprise,
            no_auth = request.no_auth,
            "Starting extract"
        );
        let result = ctx.guard(self.run_extract(ctx, request, server)).await;
        match &result {
            Ok(ops) => tracing::info!(
                ops,
                duration_secs = start.elapsed().as_secs_f64(),
                "Extract completed"
            ),
            Err(e) => tracing::error!(error = %e, kind = %e.kind(), "Extract failed"),
        }
        result
    }

    async fn run_extract(
        &self,
        ctx: &CallContext,
        request: &ExtractRequest,
        server: &mut dyn ExtractServer,
    ) -> Result<u64> {
        let admission = authorize(self.cluster.auth.as_ref(), ctx, "Extract").await?;
        let extractor = Extractor::new(&self.cluster, &self.config.spec_repo)
            .with_auth(admission.auth_enabled())
            .with_block_chunk_bytes(self.block_chunk_bytes());
        match request.destination() {
            Some(url) => {
                let mut sink = UrlSink::create(
                    &self.stores,
                    url,
                    &self.config.compression,
                    &self.config.limits,
                )?;
                drive(&extractor, request, &mut sink).await
            }
            None => drive(&extractor, request, &mut StreamSink::new(server)).await,
        }
    }

    /// Block payload per operation: half the record limit, leaving room
    /// for the envelope's encoding overhead.
    fn block_chunk_bytes(&self) -> usize {
        usize::try_from(self.config.limits.max_record_bytes / 2).unwrap_or(usize::MAX)
    }

    /// The creation operation for a single pipeline.
    ///
    /// # Errors
    ///
    /// Fails like [`extract`](Self::extract), or if the pipeline does not
    /// exist.
    pub async fn extract_pipeline(&self, ctx: &CallContext, pipeline: &Pipeline) -> Result<Envelope> {
        ctx.guard(async {
            authorize(self.cluster.auth.as_ref(), ctx, "ExtractPipeline").await?;
            Extractor::new(&self.cluster, &self.config.spec_repo)
                .pipeline_op(pipeline)
                .await
        })
        .await
    }

    /// Apply the operations the caller streams in, or those stored at the
    /// URL its first message names. Returns the number applied.
    ///
    /// Unread messages are drained and the call is acknowledged whether or
    /// not the restore succeeded, unless it was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotAuthorized`] before anything is applied for
    /// a non-admin caller on a cluster with auth, otherwise the first
    /// decode, apply or transport error.
    pub async fn restore(&self, ctx: &CallContext, server: &mut dyn RestoreServer) -> Result<u64> {
        let start = Instant::now();
        tracing::info!("Starting restore");
        let mut restorer = Restorer::new(
            &self.cluster,
            &self.stores,
            ctx,
            self.config.limits.max_record_bytes,
        );
        let mut result = ctx
            .guard(async {
                authorize(self.cluster.auth.as_ref(), ctx, "Restore").await?;
                restorer.run(&mut *server).await
            })
            .await;
        if !matches!(result, Err(AdminError::Cancelled)) {
            let drained = drain(server).await;
            let acked = server.send_and_close().await;
            result = result.and(drained).and(acked);
        }
        let applied = restorer.applied();
        match &result {
            Ok(()) => tracing::info!(
                ops = applied,
                duration_secs = start.elapsed().as_secs_f64(),
                "Restore completed"
            ),
            Err(e) => tracing::error!(error = %e, kind = %e.kind(), ops = applied, "Restore failed"),
        }
        result.map(|()| applied)
    }

    /// Run an extract over an in-process stream and collect its output.
    ///
    /// # Errors
    ///
    /// Fails like [`extract`](Self::extract).
    pub async fn extract_to_vec(
        &self,
        ctx: &CallContext,
        request: &ExtractRequest,
    ) -> Result<Vec<Envelope>> {
        let (mut tx, mut rx) = extract_channel(self.config.transport.channel_capacity);
        let extract = async move { self.extract(ctx, request, &mut tx).await };
        let collect = async {
            let mut ops = Vec::new();
            while let Some(op) = rx.recv().await {
                ops.push(op);
            }
            ops
        };
        let (result, ops) = tokio::join!(extract, collect);
        result.map(|_| ops)
    }

    /// Run a restore over an in-process stream fed from `requests`.
    ///
    /// # Errors
    ///
    /// Fails like [`restore`](Self::restore), or if the call ends without
    /// an acknowledgment.
    pub async fn restore_from<I>(&self, ctx: &CallContext, requests: I) -> Result<u64>
    where
        I: IntoIterator<Item = RestoreRequest>,
    {
        let (client, mut server) = restore_channel(self.config.transport.channel_capacity);
        let restore = async move {
            let result = self.restore(ctx, &mut server).await;
            drop(server);
            result
        };
        let send = async move {
            for request in requests {
                if client.send(request).await.is_err() {
                    break;
                }
            }
            client.close_and_recv().await
        };
        let (result, ack) = tokio::join!(restore, send);
        let applied = result?;
        ack.map(|()| applied)
    }
}

/// Run `extractor` into `sink` and seal it. The extract's own error wins
/// over a sealing error.
async fn drive(extractor: &Extractor<'_>, request: &ExtractRequest, sink: &mut dyn OpSink) -> Result<u64> {
    let result = extractor.run(request, sink).await;
    let finished = sink.finish().await;
    result.and(finished)?;
    Ok(sink.written())
}

async fn drain(server: &mut dyn RestoreServer) -> Result<()> {
    let mut discarded = 0u64;
    while server.recv().await?.is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        tracing::debug!(discarded, "Discarded unread restore messages");
    }
    Ok(())
}
