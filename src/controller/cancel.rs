//! Cancellation for a single reconciliation invocation
//!
//! An [`Invocation`] bundles the caller's cancellation token with an optional
//! deadline. Every cluster call is raced against both, so shutdown or a
//! timeout stops the pass between calls instead of after it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Cancellation scope of one reconciliation invocation
#[derive(Clone, Debug)]
pub struct Invocation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Invocation {
    /// Create an invocation cancelled through `token`
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Invocation that is never cancelled from outside
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Cancel the invocation once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Cancel the invocation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail with [`Error::Cancelled`] if the invocation may not start new work
    pub fn check(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled("shutdown requested"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::cancelled("deadline exceeded"));
        }
        Ok(())
    }

    /// Run one cluster call unless the invocation is cancelled first
    pub async fn run<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::cancelled("shutdown requested")),
            _ = deadline => Err(Error::cancelled("deadline exceeded")),
            result = call => result,
        }
    }
}
