//! Cancellation bridge.
//!
//! A [`CancelToken`] is handed to a call through
//! [`QueryOptions::cancel_token`](crate::QueryOptions::cancel_token). Every
//! suspension point of that call (pool acquisition, request send, header wait,
//! each body chunk read) awaits through the same [`CallGuard`], so one firing
//! resolves whichever of them is pending with [`ClientError::Cancelled`].
//! Firing after the call settled does nothing, and firing twice is the same
//! as firing once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::ClientError;

/// A cloneable, idempotent cancellation signal.
///
/// # Example
///
/// ```ignore
/// use clickhouse_http_client::{CancelToken, QueryOptions};
///
/// let token = CancelToken::new();
/// let options = QueryOptions::new().cancel_token(token.clone());
///
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
///     token.cancel();
/// });
///
/// let err = client.query("SELECT sleep(3)", options).await.unwrap_err();
/// assert!(err.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the token. Never fails; firing again is a no-op.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on firing.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Where in its lifecycle a call was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Acquire,
    Send,
    Receive,
}

impl Stage {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Send => "send",
            Stage::Receive => "receive",
        }
    }
}

/// Deadline and cancel token shared by every suspension point of one call.
#[derive(Clone, Debug)]
pub(crate) struct CallGuard {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CallGuard {
    /// Start the call's clock now.
    pub(crate) fn new(timeout: Option<Duration>, cancel: Option<CancelToken>) -> Self {
        Self {
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    /// Time left until the deadline; `None` when the call has no deadline.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the call was already cancelled or is past its deadline.
    pub(crate) fn check(&self, stage: Stage) -> Result<(), ClientError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            tracing::debug!(stage = stage.as_str(), "cancellation observed");
            return Err(ClientError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(self.timeout_error(stage));
        }
        Ok(())
    }

    /// Await `fut` unless the token fires or the deadline passes first.
    ///
    /// Cancellation is checked before the deadline, and both before `fut`,
    /// so a call that was cancelled never reports anything else.
    pub(crate) async fn run<T, F>(&self, stage: Stage, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        self.check(stage)?;
        tokio::select! {
            biased;

            _ = fired(self.cancel.as_ref()) => {
                tracing::debug!(stage = stage.as_str(), "cancellation observed");
                Err(ClientError::Cancelled)
            }

            _ = expired(self.deadline) => Err(self.timeout_error(stage)),

            result = fut => result,
        }
    }

    fn timeout_error(&self, stage: Stage) -> ClientError {
        tracing::debug!(stage = stage.as_str(), timeout = ?self.timeout, "deadline exceeded");
        ClientError::Timeout(format!(
            "request exceeded its {:?} deadline during {}",
            self.timeout.unwrap_or_default(),
            stage.as_str()
        ))
    }
}

async fn fired(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        // Already fired: resolves immediately.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_clone_observes_cancel() {
        let token = CancelToken::new();
        let clone = token.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled_while_pending() {
        let token = CancelToken::new();
        let guard = CallGuard::new(Some(Duration::from_secs(3)), Some(token.clone()));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = guard
            .run(Stage::Receive, std::future::pending::<Result<(), ClientError>>())
            .await;
        assert!(result.unwrap_err().is_cancelled());

        // Firing again after the call settled changes nothing.
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let guard = CallGuard::new(Some(Duration::from_millis(100)), None);
        let err = guard
            .run(Stage::Send, std::future::pending::<Result<(), ClientError>>())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("send"));
    }

    #[tokio::test]
    async fn test_check_before_send() {
        let token = CancelToken::new();
        token.cancel();
        let guard = CallGuard::new(None, Some(token));
        assert!(guard.check(Stage::Send).unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let guard = CallGuard::new(Some(Duration::from_secs(1)), Some(CancelToken::new()));
        let value = guard.run(Stage::Acquire, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(guard.remaining().unwrap() <= Duration::from_secs(1));
    }
}
