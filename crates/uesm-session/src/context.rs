//! Cancellable operation context threaded through every store call.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Execution context for a single session store operation.
///
/// Every backend round trip is raced against the context's cancellation
/// token. Cancelling drops the in-flight backend future and the operation
/// returns [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancellation: CancellationToken,
}

impl OpContext {
    /// A fresh context that is never cancelled unless its token is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context bound to an existing cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// A child context, cancelled together with this one but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
        }
    }

    /// The underlying cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancel this context.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Check whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run `fut` unless the context is cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}
