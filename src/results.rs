//! Row snapshots and large-object handles.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::driver::{NativeCursor, NativeLob};
use crate::error::SqlTransactError;
use crate::scope::Scope;
use crate::types::SqlValue;

/// Shared handle to a driver-native large object.
///
/// The handle is snapshotted into a [`Row`] without materializing content;
/// [`LobHandle::read`] opens the native stream once, applies a caller-supplied
/// reader, and frees the handle. Handles are also registered on the
/// connection-scope at snapshot time, so an unread handle is freed no later
/// than the end of the owning transaction. Freeing is idempotent.
#[derive(Clone)]
pub struct LobHandle {
    inner: Arc<Mutex<Option<Box<dyn NativeLob + Send>>>>,
}

impl LobHandle {
    pub(crate) fn new(native: Box<dyn NativeLob + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(native))),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn NativeLob + Send>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the content stream, apply `reader`, then free the handle.
    ///
    /// The handle is consumed even if the reader fails; a second read raises
    /// `InvalidUsage`.
    pub fn read<R>(
        &self,
        reader: impl FnOnce(&mut dyn Read) -> std::io::Result<R>,
    ) -> Result<R, SqlTransactError> {
        let mut native = self.slot().take().ok_or_else(|| {
            SqlTransactError::invalid_usage("large-object handle was already read or freed")
        })?;
        let result = native
            .open_stream()
            .map_err(SqlTransactError::from)
            .and_then(|mut stream| reader(stream.as_mut()).map_err(SqlTransactError::from));
        let free_result = native.free();
        let value = result?;
        free_result?;
        Ok(value)
    }

    /// Free the native handle without reading it. No-op if already freed.
    pub fn free(&self) -> Result<(), SqlTransactError> {
        if let Some(mut native) = self.slot().take() {
            native.free()?;
        }
        Ok(())
    }

    /// Whether the handle has been read or freed.
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.slot().is_none()
    }
}

impl fmt::Debug for LobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobHandle")
            .field("freed", &self.is_freed())
            .finish()
    }
}

impl PartialEq for LobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Column labels of one result, shared across all of its rows.
///
/// Lookup keys are lowercased once here so row access is case-insensitive
/// without per-lookup string work.
pub(crate) struct ColumnIndex {
    labels: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    pub(crate) fn from_cursor(cursor: &dyn NativeCursor) -> Self {
        let count = cursor.column_count();
        let mut labels = Vec::with_capacity(count);
        let mut by_name = HashMap::with_capacity(count);
        for i in 0..count {
            let label = cursor.column_label(i + 1);
            by_name.entry(label.to_lowercase()).or_insert(i);
            labels.push(label);
        }
        Self { labels, by_name }
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.by_name.get(&label.to_lowercase()).copied()
    }
}

/// One result row, eagerly snapshotted at the moment the cursor advanced.
///
/// A row is immutable and independent of cursor position: it stays valid
/// after the stream moves on or closes. The exception is large-object
/// columns, whose [`LobHandle`]s reference driver state owned by the
/// transaction.
#[derive(Clone)]
pub struct Row {
    columns: Arc<ColumnIndex>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Snapshot the cursor's current row. Large-object handles discovered
    /// here are registered on the connection-scope, not any statement-scope:
    /// the caller may still be holding the row long after this statement is
    /// done.
    pub(crate) fn snapshot(
        cursor: &mut dyn NativeCursor,
        columns: &Arc<ColumnIndex>,
        connection_scope: &Scope,
    ) -> Result<Self, SqlTransactError> {
        let count = columns.labels.len();
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let value = cursor.value(i + 1)?;
            if let SqlValue::Lob(handle) = &value {
                let handle = handle.clone();
                connection_scope.defer(move || handle.free());
            }
            values.push(value);
        }
        Ok(Self {
            columns: Arc::clone(columns),
            values,
        })
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Column labels in result order.
    #[must_use]
    pub fn column_labels(&self) -> &[String] {
        &self.columns.labels
    }

    /// Raw value by column label (case-insensitive).
    pub fn get(&self, label: &str) -> Result<&SqlValue, SqlTransactError> {
        let position = self.columns.position(label).ok_or_else(|| {
            SqlTransactError::invalid_usage(format!("no column labeled `{label}` in this result"))
        })?;
        self.get_at(position)
    }

    /// Raw value by 0-based position.
    pub fn get_at(&self, position: usize) -> Result<&SqlValue, SqlTransactError> {
        self.values.get(position).ok_or_else(|| {
            SqlTransactError::invalid_usage(format!(
                "column position {position} out of range for a {}-column row",
                self.values.len()
            ))
        })
    }

    /// Typed accessor: `i64` (see [`SqlValue::as_i64`] for the coercions).
    pub fn as_i64(&self, label: &str) -> Result<Option<i64>, SqlTransactError> {
        self.get(label)?.as_i64()
    }

    /// Typed accessor: `i32`.
    pub fn as_i32(&self, label: &str) -> Result<Option<i32>, SqlTransactError> {
        self.get(label)?.as_i32()
    }

    /// Typed accessor: `f64`.
    pub fn as_f64(&self, label: &str) -> Result<Option<f64>, SqlTransactError> {
        self.get(label)?.as_f64()
    }

    /// Typed accessor: `bool`.
    pub fn as_bool(&self, label: &str) -> Result<Option<bool>, SqlTransactError> {
        self.get(label)?.as_bool()
    }

    /// Typed accessor: text.
    pub fn as_text(&self, label: &str) -> Result<Option<String>, SqlTransactError> {
        self.get(label)?.as_text()
    }

    /// Typed accessor: date.
    pub fn as_date(&self, label: &str) -> Result<Option<NaiveDate>, SqlTransactError> {
        self.get(label)?.as_date()
    }

    /// Typed accessor: time of day.
    pub fn as_time(&self, label: &str) -> Result<Option<NaiveTime>, SqlTransactError> {
        self.get(label)?.as_time()
    }

    /// Typed accessor: timestamp.
    pub fn as_timestamp(&self, label: &str) -> Result<Option<NaiveDateTime>, SqlTransactError> {
        self.get(label)?.as_timestamp()
    }

    /// Typed accessor: canonical decimal text.
    pub fn as_decimal(&self, label: &str) -> Result<Option<String>, SqlTransactError> {
        self.get(label)?.as_decimal()
    }

    /// Typed accessor: materialized bytes.
    pub fn as_bytes(&self, label: &str) -> Result<Option<Vec<u8>>, SqlTransactError> {
        self.get(label)?.as_bytes()
    }

    /// Stream a large-object column through `reader`, freeing the native
    /// handle afterward. `Ok(None)` for a NULL column.
    pub fn read_lob<R>(
        &self,
        label: &str,
        reader: impl FnOnce(&mut dyn Read) -> std::io::Result<R>,
    ) -> Result<Option<R>, SqlTransactError> {
        match self.get(label)? {
            SqlValue::Null => Ok(None),
            SqlValue::Lob(handle) => handle.read(reader).map(Some),
            other => Err(SqlTransactError::Coercion {
                value: format!("{other:?}"),
                from: other.kind(),
                to: "large-object",
            }),
        }
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.columns.labels.iter().zip(self.values.iter()))
            .finish()
    }
}
