//! Lazy, pull-based row streams.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::{NativeCursor, NativeStatement};
use crate::error::SqlTransactError;
use crate::params::OutputParameter;
use crate::results::{ColumnIndex, Row};
use crate::scope::Scope;

/// Row-mapping function applied to each snapshotted row.
pub type RowMapper<T> = Box<dyn FnMut(&Row) -> Result<T, SqlTransactError>>;

/// A forward-only, single-pass, closeable sequence of mapped rows backed by
/// one open cursor and one open statement.
///
/// Each advance blocks on a cursor fetch and eagerly snapshots the row.
/// Closing the stream (explicitly, or implicitly by draining it) closes the
/// cursor and then the statement, exactly once. For result-returning
/// procedure calls, registered output parameters are read back during close,
/// after the cursor closes and before the statement does — so their values
/// are not valid until the stream has been closed or exhausted.
pub struct RowStream<T> {
    cursor: Option<Box<dyn NativeCursor>>,
    statement: Option<Box<dyn NativeStatement>>,
    columns: Arc<ColumnIndex>,
    mapper: RowMapper<T>,
    connection_scope: Scope,
    outputs: Vec<(usize, OutputParameter)>,
    closed: bool,
}

impl<T> RowStream<T> {
    pub(crate) fn new(
        cursor: Box<dyn NativeCursor>,
        statement: Box<dyn NativeStatement>,
        mapper: RowMapper<T>,
        connection_scope: Scope,
        outputs: Vec<(usize, OutputParameter)>,
    ) -> Self {
        let columns = Arc::new(ColumnIndex::from_cursor(cursor.as_ref()));
        Self {
            cursor: Some(cursor),
            statement: Some(statement),
            columns,
            mapper,
            connection_scope,
            outputs,
            closed: false,
        }
    }

    /// Fetch and map the next row; `Ok(None)` once the result is exhausted.
    ///
    /// Exhaustion closes the stream, so draining it to the end has the same
    /// effect as an explicit [`RowStream::close`].
    pub fn next_row(&mut self) -> Result<Option<T>, SqlTransactError> {
        if self.closed {
            return Ok(None);
        }
        let advanced = match self.cursor.as_mut() {
            Some(cursor) => cursor.advance()?,
            None => false,
        };
        if !advanced {
            self.close()?;
            return Ok(None);
        }
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| SqlTransactError::invalid_usage("cursor vanished mid-stream"))?;
        let row = Row::snapshot(cursor.as_mut(), &self.columns, &self.connection_scope)?;
        (self.mapper)(&row).map(Some)
    }

    /// Drain the remaining rows into a vector, closing the stream.
    pub fn collect_rows(mut self) -> Result<Vec<T>, SqlTransactError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the cursor, read back any registered output parameters, then
    /// close the statement. Idempotent.
    ///
    /// A failure in an earlier step never skips the later ones; the first
    /// failure is reported.
    pub fn close(&mut self) -> Result<(), SqlTransactError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(outputs = self.outputs.len(), "closing row stream");

        let mut first_failure: Option<SqlTransactError> = None;
        let mut note = |r: Result<(), SqlTransactError>| {
            if let Err(e) = r {
                if first_failure.is_none() {
                    first_failure = Some(e);
                } else {
                    warn!(error = %e, "additional failure while closing row stream");
                }
            }
        };

        if let Some(mut cursor) = self.cursor.take() {
            note(cursor.close().map_err(Into::into));
        }
        if let Some(mut statement) = self.statement.take() {
            for (position, out) in self.outputs.drain(..) {
                match statement.out_value(position) {
                    Ok(value) => out.store(value),
                    Err(e) => note(Err(e.into())),
                }
            }
            note(statement.close().map_err(Into::into));
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether the stream has been closed (explicitly or by exhaustion).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowStream<Row> {
    /// Identity mapper for callers that want the raw rows.
    pub(crate) fn identity_mapper() -> RowMapper<Row> {
        Box::new(|row: &Row| Ok(row.clone()))
    }
}

impl<T> Iterator for RowStream<T> {
    type Item = Result<T, SqlTransactError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl<T> Drop for RowStream<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "row stream dropped without a clean close");
        }
    }
}

impl<T> fmt::Debug for RowStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("closed", &self.closed)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
