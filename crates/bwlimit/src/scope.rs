//! Cancellation and deadlines for token waits.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ThrottleError;

/// Bounds a single wait for tokens.
///
/// A scope with neither a token nor a deadline waits as long as it takes.
#[derive(Debug, Clone, Default)]
pub struct WaitScope {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl WaitScope {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now. `None` leaves the scope as is.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => self.with_deadline(Instant::now() + t),
            None => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error this scope has already fired with, if any.
    pub fn check(&self) -> Result<(), ThrottleError> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(ThrottleError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(ThrottleError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Completes when the scope fires. Pending forever for an unbounded scope.
    pub async fn fired(&self) -> ThrottleError {
        let cancelled = async {
            match &self.token {
                Some(t) => t.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancelled => ThrottleError::Cancelled,
            _ = expired => ThrottleError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_as_deadline_exceeded() {
        let scope = WaitScope::unbounded().with_timeout(Some(Duration::from_millis(250)));
        assert_eq!(scope.check(), Ok(()));
        let start = Instant::now();
        assert_eq!(scope.fired().await, ThrottleError::DeadlineExceeded);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(scope.check(), Err(ThrottleError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn token_fires_as_cancelled() {
        let token = CancellationToken::new();
        let scope = WaitScope::unbounded().with_token(token.clone());
        token.cancel();
        assert_eq!(scope.check(), Err(ThrottleError::Cancelled));
        assert_eq!(scope.fired().await, ThrottleError::Cancelled);
    }

    #[test]
    fn unbounded_scope_never_fires_on_check() {
        assert_eq!(WaitScope::unbounded().check(), Ok(()));
        assert_eq!(WaitScope::unbounded().with_timeout(None).deadline(), None);
    }
}
