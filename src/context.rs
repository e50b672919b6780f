//! Operation Context
//!
//! Cancellation and deadlines for bucket calls. Each call takes an
//! [`OpContext`]; suspension points (network calls, admission waits) race
//! against it through [`OpContext::run`].

use crate::storage::{BucketError, BucketResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable, deadline-aware context for one logical operation
#[derive(Debug, Clone)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OpContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        OpContext {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context cancelled together with `token`
    pub fn with_token(token: CancellationToken) -> Self {
        OpContext {
            token,
            deadline: None,
        }
    }

    /// A fresh context, unrelated to any caller, that expires after `timeout`
    pub fn detached(timeout: Duration) -> Self {
        Self::background().with_timeout(timeout)
    }

    /// Child context: cancelled with the parent, deadline at most `timeout` away
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the earlier of the parent's deadline and `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        OpContext {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child context that can be cancelled without affecting the parent
    pub fn child(&self) -> Self {
        OpContext {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why this context is done, if it is
    pub fn err(&self) -> Option<BucketError> {
        if self.token.is_cancelled() {
            return Some(BucketError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(BucketError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> BucketResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive `fut` until it completes or the context is done, whichever is first.
    pub async fn run<T, F>(&self, fut: F) -> BucketResult<T>
    where
        F: Future<Output = BucketResult<T>>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BucketError::Cancelled),
            _ = deadline => Err(BucketError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = OpContext::background();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let ctx = OpContext::background();
        ctx.cancel();
        let err = ctx.run(async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_pending_work() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_child_cancelled_with_parent() {
        let parent = OpContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let other = OpContext::background();
        let other_child = other.child();
        other_child.cancel();
        assert!(!other.is_cancelled());
    }

    #[tokio::test]
    async fn test_detached_ignores_caller_cancellation() {
        let caller = OpContext::background();
        caller.cancel();
        let cleanup = OpContext::detached(Duration::from_secs(1));
        assert!(cleanup.check().is_ok());
    }

    #[tokio::test]
    async fn test_with_deadline_keeps_earlier_parent_deadline() {
        let parent = OpContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
