//! Connection handle: one native connection, one connection-scope, and the
//! update / batch / query / call operations.

use tracing::{debug, warn};

use crate::driver::{NativeConnection, NativeStatement};
use crate::error::SqlTransactError;
use crate::params::{Batch, InputParameter, OutputParameter, Parameter};
use crate::query::{RowMapper, RowStream};
use crate::results::Row;
use crate::scope::Scope;

/// Owns exactly one open native connection and its connection-scope.
///
/// All statements issued through one handle execute strictly in issuance
/// order on the single underlying connection. The handle is not meant to be
/// shared across threads, and every operation blocks for the duration of its
/// driver calls.
///
/// `close` is terminal: it rolls back whatever was not committed, releases
/// connection-scoped resources (still-open large-object handles), and closes
/// the native connection, in that fixed order.
pub struct ConnectionHandle {
    conn: Box<dyn NativeConnection>,
    connection_scope: Scope,
    closed: bool,
}

impl ConnectionHandle {
    /// Wrap an open native connection, disabling auto-commit.
    pub fn new(mut conn: Box<dyn NativeConnection>) -> Result<Self, SqlTransactError> {
        conn.set_autocommit(false)?;
        Ok(Self {
            conn,
            connection_scope: Scope::new(),
            closed: false,
        })
    }

    /// The scope bounded by this transaction's lifetime. Resources deferred
    /// here are released when the handle closes.
    #[must_use]
    pub fn connection_scope(&self) -> &Scope {
        &self.connection_scope
    }

    fn ensure_open(&self, op: &str) -> Result<(), SqlTransactError> {
        if self.closed {
            Err(SqlTransactError::invalid_usage(format!(
                "{op} on a closed connection handle"
            )))
        } else {
            Ok(())
        }
    }

    fn ensure_sql(sql: &str, op: &str) -> Result<(), SqlTransactError> {
        if sql.trim().is_empty() {
            Err(SqlTransactError::invalid_usage(format!(
                "{op} requires a non-empty SQL string"
            )))
        } else {
            Ok(())
        }
    }

    /// Execute a statement that returns no rows (INSERT, UPDATE, DELETE,
    /// DDL). Returns the driver-reported number of affected rows.
    ///
    /// Stream-backed parameters are released after execution; on any native
    /// failure the statement-scope and statement are still closed before the
    /// failure propagates.
    pub fn update(
        &mut self,
        sql: &str,
        params: Vec<InputParameter>,
    ) -> Result<u64, SqlTransactError> {
        self.ensure_open("update")?;
        Self::ensure_sql(sql, "update")?;
        debug!(sql, params = params.len(), "update");

        let scope = Scope::new();
        let mut statement = self.conn.prepare(sql)?;
        let result = bind_inputs(statement.as_mut(), params, &scope)
            .and_then(|()| statement.execute().map_err(Into::into));
        finish_statement(statement, &scope, result)
    }

    /// Execute one statement once per batch row.
    ///
    /// One statement-scope spans the whole call, so stream-backed parameters
    /// stay alive until the entire batch has executed. Preconditions (at
    /// least one batch, no empty batch, equal arity) are checked before any
    /// native call.
    pub fn update_batch(
        &mut self,
        sql: &str,
        batches: Vec<Batch>,
    ) -> Result<Vec<u64>, SqlTransactError> {
        self.ensure_open("update_batch")?;
        Self::ensure_sql(sql, "update_batch")?;
        if batches.is_empty() {
            return Err(SqlTransactError::invalid_usage(
                "update_batch requires at least one batch",
            ));
        }
        let arity = batches[0].len();
        for (i, batch) in batches.iter().enumerate() {
            if batch.is_empty() {
                return Err(SqlTransactError::invalid_usage(format!(
                    "batch {i} has no parameters"
                )));
            }
            if batch.len() != arity {
                return Err(SqlTransactError::invalid_usage(format!(
                    "batch {i} has {} parameters, expected {arity}",
                    batch.len()
                )));
            }
        }
        debug!(sql, batches = batches.len(), arity, "update_batch");

        let scope = Scope::new();
        let mut statement = self.conn.prepare(sql)?;
        let result = (|| {
            for batch in batches {
                bind_inputs(statement.as_mut(), batch.into_params(), &scope)?;
                statement.add_batch()?;
            }
            statement.execute_batch().map_err(Into::into)
        })();
        finish_statement(statement, &scope, result)
    }

    /// Execute a query and return a lazy stream of mapped rows.
    ///
    /// Input streams are released right after binding: a query's parameters
    /// are consumed by the driver during bind, unlike an insert's, which the
    /// driver may read lazily at execute. Large-object handles discovered
    /// while the caller maps rows live on the connection-scope and are freed
    /// no later than [`ConnectionHandle::close`].
    pub fn query<T, M>(
        &mut self,
        sql: &str,
        mapper: M,
        params: Vec<InputParameter>,
    ) -> Result<RowStream<T>, SqlTransactError>
    where
        M: FnMut(&Row) -> Result<T, SqlTransactError> + 'static,
    {
        self.ensure_open("query")?;
        Self::ensure_sql(sql, "query")?;
        debug!(sql, params = params.len(), "query");
        let statement = self.conn.prepare(sql)?;
        self.run_query(statement, Box::new(mapper), params, Vec::new())
    }

    /// Execute a query and stream back the raw rows.
    pub fn query_rows(
        &mut self,
        sql: &str,
        params: Vec<InputParameter>,
    ) -> Result<RowStream<Row>, SqlTransactError> {
        self.ensure_open("query")?;
        Self::ensure_sql(sql, "query")?;
        debug!(sql, params = params.len(), "query");
        let statement = self.conn.prepare(sql)?;
        self.run_query(statement, RowStream::identity_mapper(), params, Vec::new())
    }

    /// Call a stored procedure that returns no result rows.
    ///
    /// Output and input-output parameter cells are populated before this
    /// method returns: execution, output read-back, and statement cleanup all
    /// complete inside the call.
    pub fn call(&mut self, sql: &str, params: Vec<Parameter>) -> Result<(), SqlTransactError> {
        self.ensure_open("call")?;
        Self::ensure_sql(sql, "call")?;
        debug!(sql, params = params.len(), "call");

        let scope = Scope::new();
        let mut statement = self.conn.prepare_call(sql)?;
        let result = bind_parameters(statement.as_mut(), params, &scope).and_then(|outputs| {
            statement.execute()?;
            for (position, out) in outputs {
                let value = statement.out_value(position)?;
                out.store(value);
            }
            Ok(0u64)
        });
        finish_statement(statement, &scope, result).map(|_| ())
    }

    /// Call a stored procedure that returns result rows.
    ///
    /// The cursor and statement stay open until the returned stream is
    /// closed or exhausted, and output-parameter read-back happens during
    /// that close. **Output and input-output values are not valid until the
    /// stream has been closed or drained**; a caller that discards the
    /// stream without draining it will observe absent or stale values.
    pub fn call_with_results<T, M>(
        &mut self,
        sql: &str,
        mapper: M,
        params: Vec<Parameter>,
    ) -> Result<RowStream<T>, SqlTransactError>
    where
        M: FnMut(&Row) -> Result<T, SqlTransactError> + 'static,
    {
        self.ensure_open("call_with_results")?;
        Self::ensure_sql(sql, "call_with_results")?;
        debug!(sql, params = params.len(), "call_with_results");

        let mut statement = self.conn.prepare_call(sql)?;
        let bind_scope = Scope::new();
        let bound = bind_parameters(statement.as_mut(), params, &bind_scope);
        let scope_close = bind_scope.close();
        let outputs = match (bound, scope_close) {
            (Ok(outputs), Ok(())) => outputs,
            (bound, scope_close) => {
                let failure = bound.err().or(scope_close.err()).unwrap_or_else(|| {
                    SqlTransactError::invalid_usage("bind failed without an error")
                });
                close_statement_quiet(statement);
                return Err(failure);
            }
        };

        match statement.execute_query() {
            Ok(cursor) => Ok(RowStream::new(
                cursor,
                statement,
                Box::new(mapper),
                self.connection_scope.clone(),
                outputs,
            )),
            Err(e) => {
                close_statement_quiet(statement);
                Err(e.into())
            }
        }
    }

    fn run_query<T>(
        &mut self,
        mut statement: Box<dyn NativeStatement>,
        mapper: RowMapper<T>,
        params: Vec<InputParameter>,
        outputs: Vec<(usize, OutputParameter)>,
    ) -> Result<RowStream<T>, SqlTransactError> {
        // Statement-scope for a query only spans the bind phase.
        let bind_scope = Scope::new();
        let bound = bind_inputs(statement.as_mut(), params, &bind_scope);
        let scope_close = bind_scope.close();
        if let Err(e) = bound.and(scope_close) {
            close_statement_quiet(statement);
            return Err(e);
        }

        match statement.execute_query() {
            Ok(cursor) => Ok(RowStream::new(
                cursor,
                statement,
                mapper,
                self.connection_scope.clone(),
                outputs,
            )),
            Err(e) => {
                close_statement_quiet(statement);
                Err(e.into())
            }
        }
    }

    /// Commit the current transaction. No scope interaction.
    pub fn commit(&mut self) -> Result<(), SqlTransactError> {
        self.ensure_open("commit")?;
        debug!("commit");
        self.conn.commit()?;
        Ok(())
    }

    /// Roll back, release connection-scoped resources, close the native
    /// connection — always in that order, always all three.
    ///
    /// The rollback is unconditional: after a successful commit it is a
    /// harmless no-op, and after anything else it is the thing that makes
    /// the transaction all-or-nothing. Idempotent; the first failure is
    /// reported after every step has run.
    pub fn close(&mut self) -> Result<(), SqlTransactError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("closing connection handle");

        let rollback = self.conn.rollback().map_err(Into::into);
        let scope = self.connection_scope.close();
        let close = self.conn.close().map_err(Into::into);

        rollback.and(scope).and(close)
    }

    /// Whether [`ConnectionHandle::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(error = %e, "connection handle dropped without a clean close");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.closed)
            .field("connection_scope", &self.connection_scope)
            .finish()
    }
}

/// Bind plain input parameters positionally (1-based).
fn bind_inputs(
    statement: &mut dyn NativeStatement,
    params: Vec<InputParameter>,
    scope: &Scope,
) -> Result<(), SqlTransactError> {
    for (i, param) in params.into_iter().enumerate() {
        param.bind(statement, i + 1, scope)?;
    }
    Ok(())
}

/// Bind the full parameter supertype, returning the positions and cells of
/// every registered output for the post-execute read-back phase.
fn bind_parameters(
    statement: &mut dyn NativeStatement,
    params: Vec<Parameter>,
    scope: &Scope,
) -> Result<Vec<(usize, OutputParameter)>, SqlTransactError> {
    let mut outputs = Vec::new();
    for (i, param) in params.into_iter().enumerate() {
        let position = i + 1;
        match param {
            Parameter::In(input) => input.bind(statement, position, scope)?,
            Parameter::Out(out) => {
                statement.register_out(position, out.sql_type())?;
                outputs.push((position, out));
            }
            Parameter::InOut(in_out) => {
                // Seed value first, then the output registration.
                match in_out.value() {
                    Some(value) => statement.bind_value(position, &value, in_out.sql_type())?,
                    None => statement.bind_null(position, in_out.sql_type())?,
                }
                statement.register_out(position, in_out.sql_type())?;
                outputs.push((position, in_out.as_output()));
            }
        }
    }
    Ok(outputs)
}

/// Close the statement-scope, then the statement, regardless of how the
/// operation's main result came out; the operation's failure wins, then the
/// scope's, then the statement's.
fn finish_statement<T>(
    mut statement: Box<dyn NativeStatement>,
    scope: &Scope,
    result: Result<T, SqlTransactError>,
) -> Result<T, SqlTransactError> {
    let scope_close = scope.close();
    let statement_close = statement.close().map_err(SqlTransactError::from);
    let value = result?;
    scope_close?;
    statement_close?;
    Ok(value)
}

fn close_statement_quiet(mut statement: Box<dyn NativeStatement>) {
    if let Err(e) = statement.close() {
        warn!(error = %e, "statement close failed during error unwind");
    }
}
