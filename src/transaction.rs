//! Commit-or-rollback transaction boundary.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::driver::ConnectionProvider;
use crate::error::SqlTransactError;

/// Runs caller-supplied transaction bodies inside a commit/rollback/release
/// envelope.
///
/// Each execution acquires one fresh [`ConnectionHandle`] from the provider,
/// invokes the body, commits on normal return, and always closes the handle —
/// which rolls back anything uncommitted and frees connection-scoped
/// resources. An error from the body skips the commit, so the rollback in
/// `close` makes the transaction all-or-nothing.
#[derive(Clone)]
pub struct TransactionRunner {
    provider: Arc<dyn ConnectionProvider>,
}

impl TransactionRunner {
    /// Runner backed by the given connection provider.
    pub fn new(provider: impl ConnectionProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// Same as [`TransactionRunner::new`] for an already-shared provider.
    #[must_use]
    pub fn from_arc(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Run a transaction body for its effects.
    pub fn execute<F>(&self, body: F) -> Result<(), SqlTransactError>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<(), SqlTransactError>,
    {
        self.execute_with_result(body)
    }

    /// Run a transaction body and return its value.
    ///
    /// The commit only happens after the body returns `Ok`; the handle is
    /// closed in every case, and a close failure after a successful body
    /// surfaces to the caller.
    pub fn execute_with_result<T, F>(&self, body: F) -> Result<T, SqlTransactError>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<T, SqlTransactError>,
    {
        let conn = self.provider.connect()?;
        let mut handle = ConnectionHandle::new(conn)?;
        debug!("transaction started");

        let result = body(&mut handle).and_then(|value| {
            handle.commit()?;
            Ok(value)
        });
        let close_result = handle.close();

        match result {
            Ok(value) => {
                close_result?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(e) => {
                // The body's failure wins; a close failure behind it still
                // deserves a trace.
                if let Err(close_err) = close_result {
                    warn!(error = %close_err, "connection close failed after transaction error");
                }
                Err(e)
            }
        }
    }

    /// Run a transaction body for its effects on a worker thread.
    pub async fn execute_async<F>(&self, body: F) -> Result<(), SqlTransactError>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<(), SqlTransactError> + Send + 'static,
    {
        self.execute_with_result_async(body).await
    }

    /// Run a transaction body on a worker thread and return its value.
    ///
    /// The whole body (not individual statements) is offloaded with
    /// `spawn_blocking`, so the calling task never blocks; a failing body
    /// completes the future with its error after rollback and release have
    /// run on the worker.
    pub async fn execute_with_result_async<T, F>(&self, body: F) -> Result<T, SqlTransactError>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<T, SqlTransactError> + Send + 'static,
        T: Send + 'static,
    {
        let runner = self.clone();
        tokio::task::spawn_blocking(move || runner.execute_with_result(body))
            .await
            .map_err(|e| SqlTransactError::Other(format!("transaction worker join error: {e}")))?
    }
}

impl std::fmt::Debug for TransactionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRunner").finish_non_exhaustive()
    }
}
