//! Caller-owned cancellation for backend calls.

use std::future::Future;
use std::time::Duration;

use common::error::DatabaseResult;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{Phase, SessionError, SessionResult};

/// Cancellation token plus optional deadline, threaded through every store
/// operation and every backend call it makes.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one cancelled on client disconnect.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    /// A child context that also expires after `timeout`. The earlier of
    /// the two deadlines wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    /// A child context cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run one backend call under this context. Fails immediately if the
    /// context is already done; never retries.
    pub(crate) async fn run<T, F>(&self, phase: Phase, call: F) -> SessionResult<T>
    where
        F: Future<Output = DatabaseResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(SessionError::Cancelled { phase });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SessionError::DeadlineExceeded { phase });
            }
        }

        let expiry = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(SessionError::Cancelled { phase }),
            _ = expiry => Err(SessionError::DeadlineExceeded { phase }),
            result = call => result.map_err(|source| SessionError::Backend { phase, source }),
        }
    }
}
