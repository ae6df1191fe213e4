//! In-memory driver for tests.
//!
//! A scriptable backend implementing every driver capability trait: tables
//! with declared column types, a restricted statement grammar, snapshot-based
//! commit/rollback, stored procedures registered as Rust closures, an event
//! journal for ordering assertions, and one-shot failure injection.
//!
//! The grammar covers what integration tests need and nothing more:
//! `CREATE TABLE`, `INSERT ... VALUES (?, ...)`, `SELECT ... [WHERE col = ?]
//! [ORDER BY col [DESC]]`, `DELETE [WHERE col = ?]`, and `{call name(?, ...)}`.

mod conn;
mod engine;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::driver::{ConnectionProvider, NativeConnection};
use crate::error::DriverError;
use crate::types::SqlValue;

use engine::Table;

pub use conn::MemoryConnection;

/// Behavior toggles for the in-memory driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Reject inserted values whose kind does not match the declared column
    /// type.
    pub strict_types: bool,
}

/// Inputs handed to a registered stored procedure, positionally (index 0 is
/// parameter position 1). Output-only positions arrive as [`SqlValue::Null`];
/// input-output positions carry their seed.
#[derive(Debug, Clone)]
pub struct ProcCall {
    /// Bound input values.
    pub args: Vec<SqlValue>,
}

/// What a stored procedure produced: output-parameter values by 1-based
/// position, and optionally a result set.
#[derive(Debug, Clone, Default)]
pub struct ProcOutcome {
    pub(crate) outputs: HashMap<usize, SqlValue>,
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<SqlValue>>,
}

impl ProcOutcome {
    /// Outcome with no outputs and no result rows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an output-parameter value at a 1-based position.
    #[must_use]
    pub fn output(mut self, position: usize, value: SqlValue) -> Self {
        self.outputs.insert(position, value);
        self
    }

    /// Attach a result set.
    #[must_use]
    pub fn result_rows(mut self, columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        self.columns = columns;
        self.rows = rows;
        self
    }
}

type ProcFn = dyn Fn(&ProcCall) -> Result<ProcOutcome, DriverError> + Send + Sync;

#[derive(Default)]
pub(crate) struct DbState {
    pub(crate) tables: HashMap<String, Table>,
    pub(crate) baseline: HashMap<String, Table>,
    pub(crate) procedures: HashMap<String, Arc<ProcFn>>,
    pub(crate) events: Vec<String>,
    pub(crate) fail_next: HashMap<String, String>,
}

/// Shared in-memory database. Cloning shares the underlying state, so one
/// `MemoryDb` can serve several sequential transactions.
#[derive(Clone)]
pub struct MemoryDb {
    pub(crate) state: Arc<Mutex<DbState>>,
    pub(crate) config: MemoryConfig,
}

impl MemoryDb {
    /// Empty database with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Empty database with the given configuration.
    #[must_use]
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DbState::default())),
            config,
        }
    }

    /// A provider handing out connections to this database.
    #[must_use]
    pub fn provider(&self) -> MemoryProvider {
        MemoryProvider { db: self.clone() }
    }

    /// Register a stored procedure under `name`.
    pub fn register_procedure(
        &self,
        name: &str,
        body: impl Fn(&ProcCall) -> Result<ProcOutcome, DriverError> + Send + Sync + 'static,
    ) {
        self.lock()
            .procedures
            .insert(name.to_lowercase(), Arc::new(body));
    }

    /// Snapshot of the event journal.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Clear the event journal.
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Append an event from the outside (test readers use this to journal
    /// their own close).
    pub fn record_event(&self, event: impl Into<String>) {
        self.lock().events.push(event.into());
    }

    /// Make the next operation of the given kind (`execute`, `commit`, ...)
    /// fail once with `message`.
    pub fn fail_next(&self, op: &str, message: &str) {
        self.lock()
            .fail_next
            .insert(op.to_string(), message.to_string());
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, DbState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take_failure(&self, op: &str) -> Result<(), DriverError> {
        match self.lock().fail_next.remove(op) {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryDb")
            .field("tables", &state.tables.keys().collect::<Vec<_>>())
            .field("events", &state.events.len())
            .finish()
    }
}

/// Provider producing one [`MemoryConnection`] per transaction.
#[derive(Clone, Debug)]
pub struct MemoryProvider {
    db: MemoryDb,
}

impl ConnectionProvider for MemoryProvider {
    fn connect(&self) -> Result<Box<dyn NativeConnection>, DriverError> {
        self.db.take_failure("connect")?;
        self.db.record_event("connect");
        Ok(Box::new(MemoryConnection::new(self.db.clone())))
    }
}
