//! Per-call context: the caller's credential and cancellation.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{AdminError, Result};

/// State carried by one extract or restore call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: Option<String>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Anonymous, uncancelled context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Cancel this call when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The caller's token; an empty token counts as none.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` until it completes or the call is cancelled, whichever
    /// comes first. A cancelled future is dropped where it stands.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Cancelled`] on cancellation, otherwise the
    /// future's own result.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AdminError::Cancelled),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_no_token() {
        assert_eq!(CallContext::new().token(), None);
        assert_eq!(CallContext::new().with_token("").token(), None);
        assert_eq!(CallContext::new().with_token("abc").token(), Some("abc"));
    }

    #[tokio::test]
    async fn guard_passes_through_results() {
        let ctx = CallContext::new();
        assert_eq!(ctx.guard(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn guard_stops_pending_work_on_cancel() {
        let ctx = CallContext::new();
        ctx.cancel();
        let res: Result<()> = ctx.guard(futures::future::pending()).await;
        assert!(matches!(res, Err(AdminError::Cancelled)));
    }
}
