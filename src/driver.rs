//! Capability traits for the native database driver.
//!
//! The execution layer assumes a single already-open, synchronous connection
//! per transaction. Everything the layer needs from a driver is captured by
//! these traits; driver crates implement them and report failures as
//! [`DriverError`] values.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use crate::error::DriverError;
use crate::types::{SqlType, SqlValue};

/// A byte stream bound as a large-object input parameter.
///
/// The cell is shared between the binding layer and the driver: the driver
/// reads from it while the statement runs, and the statement-scope empties it
/// (dropping the reader) once the statement has executed.
pub type SharedByteStream = Rc<RefCell<Option<Box<dyn Read>>>>;

/// One open native connection. Auto-commit is controlled explicitly; the
/// layer disables it before issuing any statement.
pub trait NativeConnection {
    /// Prepare a plain statement.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, DriverError>;

    /// Prepare a stored-procedure call statement.
    fn prepare_call(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, DriverError>;

    /// Enable or disable auto-commit.
    fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Close the connection. Called at most once.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// One prepared statement. Parameter positions are 1-based, matching the
/// positional convention of prepared-statement placeholders.
pub trait NativeStatement {
    /// Bind a scalar value at a position, with an explicit type tag.
    fn bind_value(
        &mut self,
        position: usize,
        value: &SqlValue,
        sql_type: SqlType,
    ) -> Result<(), DriverError>;

    /// Bind a typed SQL NULL at a position.
    fn bind_null(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError>;

    /// Bind a large-object input stream at a position. The driver may read
    /// the stream during this call or during execute, but never after the
    /// owning statement-scope has closed.
    fn bind_stream(
        &mut self,
        position: usize,
        stream: SharedByteStream,
        sql_type: SqlType,
    ) -> Result<(), DriverError>;

    /// Register an output parameter's type at a position (call statements).
    fn register_out(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError>;

    /// Append the currently bound parameters as one batch row.
    fn add_batch(&mut self) -> Result<(), DriverError>;

    /// Execute a statement that returns no rows; reports rows affected.
    fn execute(&mut self) -> Result<u64, DriverError>;

    /// Execute every appended batch row; reports rows affected per row.
    fn execute_batch(&mut self) -> Result<Vec<u64>, DriverError>;

    /// Execute a statement that returns rows.
    fn execute_query(&mut self) -> Result<Box<dyn NativeCursor>, DriverError>;

    /// Read back a registered output parameter. Only valid after execute.
    fn out_value(&mut self, position: usize) -> Result<SqlValue, DriverError>;

    /// Close the statement. Called at most once.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A forward-only cursor over a query result.
pub trait NativeCursor {
    /// Advance to the next row; `false` once the result is exhausted.
    fn advance(&mut self) -> Result<bool, DriverError>;

    /// Number of columns in the result.
    fn column_count(&self) -> usize;

    /// Label of a column (1-based position).
    fn column_label(&self, position: usize) -> String;

    /// Raw value of a column in the current row (1-based position).
    /// Large-object columns surface a [`SqlValue::Lob`] handle.
    fn value(&mut self, position: usize) -> Result<SqlValue, DriverError>;

    /// Close the cursor. Called at most once.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A driver-native reference to out-of-line binary or character data.
pub trait NativeLob {
    /// Open a one-shot stream over the content.
    fn open_stream(&mut self) -> Result<Box<dyn Read>, DriverError>;

    /// Release the native handle.
    fn free(&mut self) -> Result<(), DriverError>;
}

/// Zero-argument factory producing one ready-to-use connection per
/// transaction. Construction and configuration of providers (credentials,
/// pooling) is the provider crate's business, not this layer's.
pub trait ConnectionProvider: Send + Sync {
    /// Open a fresh native connection.
    fn connect(&self) -> Result<Box<dyn NativeConnection>, DriverError>;
}
