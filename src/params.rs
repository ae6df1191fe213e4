//! Self-describing statement parameters.
//!
//! One generic parameter cell covers the whole scalar catalog: a value, a
//! SQL type tag, and (for large objects) a stream supplier. Output and
//! input-output parameters are cloneable handles to a shared cell that the
//! call operations populate after execution.

use std::cell::RefCell;
use std::fmt;
use std::io::Read;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

use crate::driver::{NativeStatement, SharedByteStream};
use crate::error::SqlTransactError;
use crate::scope::Scope;
use crate::types::{SqlType, SqlValue};

/// Zero-argument supplier for a large-object input stream.
///
/// `Ok(None)` means the parameter is SQL NULL: the bind step then sets a
/// typed null and registers no cleanup.
pub type StreamSupplier = Box<dyn FnOnce() -> std::io::Result<Option<Box<dyn Read>>>>;

enum InputKind {
    Scalar(SqlValue),
    Stream(StreamSupplier),
}

/// A value that binds itself positionally into a prepared statement.
///
/// Binding consumes the parameter, so a parameter binds exactly once; batch
/// executions build one parameter per row and position.
pub struct InputParameter {
    kind: InputKind,
    sql_type: SqlType,
}

impl InputParameter {
    fn scalar(value: SqlValue, sql_type: SqlType) -> Self {
        Self {
            kind: InputKind::Scalar(value),
            sql_type,
        }
    }

    /// 32-bit integer parameter.
    #[must_use]
    pub fn integer(value: i32) -> Self {
        Self::scalar(SqlValue::Int(i64::from(value)), SqlType::Integer)
    }

    /// 64-bit integer parameter.
    #[must_use]
    pub fn long(value: i64) -> Self {
        Self::scalar(SqlValue::Int(value), SqlType::BigInt)
    }

    /// 8-bit integer parameter.
    #[must_use]
    pub fn byte(value: i8) -> Self {
        Self::scalar(SqlValue::Int(i64::from(value)), SqlType::TinyInt)
    }

    /// 64-bit float parameter.
    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::scalar(SqlValue::Float(value), SqlType::Double)
    }

    /// 32-bit float parameter.
    #[must_use]
    pub fn float(value: f32) -> Self {
        Self::scalar(SqlValue::Float(f64::from(value)), SqlType::Real)
    }

    /// Boolean parameter.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::scalar(SqlValue::Bool(value), SqlType::Boolean)
    }

    /// Text parameter.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::scalar(SqlValue::Text(value.into()), SqlType::Varchar)
    }

    /// Date parameter.
    #[must_use]
    pub fn date(value: NaiveDate) -> Self {
        Self::scalar(SqlValue::Date(value), SqlType::Date)
    }

    /// Time-of-day parameter.
    #[must_use]
    pub fn time(value: NaiveTime) -> Self {
        Self::scalar(SqlValue::Time(value), SqlType::Time)
    }

    /// Timestamp parameter.
    #[must_use]
    pub fn timestamp(value: NaiveDateTime) -> Self {
        Self::scalar(SqlValue::Timestamp(value), SqlType::Timestamp)
    }

    /// Decimal parameter, canonical text form.
    #[must_use]
    pub fn decimal(value: impl Into<String>) -> Self {
        Self::scalar(SqlValue::Decimal(value.into()), SqlType::Decimal)
    }

    /// JSON parameter.
    #[must_use]
    pub fn json(value: JsonValue) -> Self {
        Self::scalar(SqlValue::Json(value), SqlType::Json)
    }

    /// Typed NULL parameter.
    #[must_use]
    pub fn null(sql_type: SqlType) -> Self {
        Self::scalar(SqlValue::Null, sql_type)
    }

    /// Binary large-object parameter fed from a stream supplier.
    #[must_use]
    pub fn blob(supplier: impl FnOnce() -> std::io::Result<Option<Box<dyn Read>>> + 'static) -> Self {
        Self {
            kind: InputKind::Stream(Box::new(supplier)),
            sql_type: SqlType::Blob,
        }
    }

    /// Character large-object parameter fed from a stream supplier.
    #[must_use]
    pub fn clob(supplier: impl FnOnce() -> std::io::Result<Option<Box<dyn Read>>> + 'static) -> Self {
        Self {
            kind: InputKind::Stream(Box::new(supplier)),
            sql_type: SqlType::Clob,
        }
    }

    /// Long-binary parameter fed from a stream supplier.
    #[must_use]
    pub fn long_binary(
        supplier: impl FnOnce() -> std::io::Result<Option<Box<dyn Read>>> + 'static,
    ) -> Self {
        Self {
            kind: InputKind::Stream(Box::new(supplier)),
            sql_type: SqlType::LongVarbinary,
        }
    }

    /// The type tag this parameter binds with.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// Bind this parameter at `position` (1-based).
    ///
    /// Scalars bind directly and register nothing. Stream-backed parameters
    /// obtain their stream from the supplier; an absent stream binds a typed
    /// null, a present one is handed to the statement and its release is
    /// deferred on `scope`. Nothing is registered for a bind the driver
    /// rejected.
    pub fn bind(
        self,
        statement: &mut dyn NativeStatement,
        position: usize,
        scope: &Scope,
    ) -> Result<(), SqlTransactError> {
        match self.kind {
            InputKind::Scalar(SqlValue::Null) => {
                statement.bind_null(position, self.sql_type)?;
            }
            InputKind::Scalar(value) => {
                statement.bind_value(position, &value, self.sql_type)?;
            }
            InputKind::Stream(supplier) => match supplier()? {
                None => statement.bind_null(position, self.sql_type)?,
                Some(stream) => {
                    let shared: SharedByteStream = Rc::new(RefCell::new(Some(stream)));
                    statement.bind_stream(position, Rc::clone(&shared), self.sql_type)?;
                    scope.defer(move || {
                        // Dropping the reader is the close; the driver's
                        // clone of the cell goes empty at the same moment.
                        shared.borrow_mut().take();
                        Ok(())
                    });
                }
            },
        }
        Ok(())
    }
}

impl fmt::Debug for InputParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InputKind::Scalar(v) => f
                .debug_struct("InputParameter")
                .field("value", v)
                .field("sql_type", &self.sql_type)
                .finish(),
            InputKind::Stream(_) => f
                .debug_struct("InputParameter")
                .field("value", &"<stream>")
                .field("sql_type", &self.sql_type)
                .finish(),
        }
    }
}

/// A mutable cell populated with a procedure's output after the call runs.
///
/// Clones share the cell: keep one clone, pass the other into
/// [`crate::ConnectionHandle::call`]. `value()` is `None` until the call has
/// executed (and, for result-returning calls, until the returned stream has
/// been closed or exhausted).
#[derive(Clone, Debug)]
pub struct OutputParameter {
    sql_type: SqlType,
    cell: Rc<RefCell<Option<SqlValue>>>,
}

impl OutputParameter {
    /// Output parameter of the given SQL type, initially absent.
    #[must_use]
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            cell: Rc::new(RefCell::new(None)),
        }
    }

    /// The registered output type.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// The last value stored by a completed call; `None` before that, and
    /// `None` for a SQL NULL output.
    #[must_use]
    pub fn value(&self) -> Option<SqlValue> {
        self.cell.borrow().clone()
    }

    pub(crate) fn store(&self, value: SqlValue) {
        *self.cell.borrow_mut() = if value.is_null() { None } else { Some(value) };
    }
}

/// An output parameter seeded with an input value.
///
/// The seed is written as the statement's input at the parameter's position
/// before the output type is registered; after the call, `value()` reflects
/// what the procedure reported, not the seed.
#[derive(Clone, Debug)]
pub struct InOutParameter {
    out: OutputParameter,
}

impl InOutParameter {
    /// Input-output parameter seeded with `initial`.
    #[must_use]
    pub fn new(initial: SqlValue, sql_type: SqlType) -> Self {
        let out = OutputParameter::new(sql_type);
        *out.cell.borrow_mut() = Some(initial);
        Self { out }
    }

    /// The registered output type.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        self.out.sql_type()
    }

    /// Current cell value: the seed before the call, the procedure's value
    /// after.
    #[must_use]
    pub fn value(&self) -> Option<SqlValue> {
        self.out.value()
    }

    pub(crate) fn as_output(&self) -> OutputParameter {
        self.out.clone()
    }
}

/// Any parameter accepted by the stored-procedure call operations.
#[derive(Debug)]
pub enum Parameter {
    /// Plain input value.
    In(InputParameter),
    /// Output cell, populated after the call.
    Out(OutputParameter),
    /// Seeded output cell.
    InOut(InOutParameter),
}

impl From<InputParameter> for Parameter {
    fn from(p: InputParameter) -> Self {
        Parameter::In(p)
    }
}

impl From<OutputParameter> for Parameter {
    fn from(p: OutputParameter) -> Self {
        Parameter::Out(p)
    }
}

impl From<InOutParameter> for Parameter {
    fn from(p: InOutParameter) -> Self {
        Parameter::InOut(p)
    }
}

/// One row's worth of positional parameters for a batch execution.
#[derive(Debug)]
pub struct Batch {
    params: Vec<InputParameter>,
}

impl Batch {
    /// Group one row of parameters. Emptiness is rejected by
    /// [`crate::ConnectionHandle::update_batch`] before any native call.
    #[must_use]
    pub fn new(params: Vec<InputParameter>) -> Self {
        Self { params }
    }

    /// Number of parameters in this row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the row has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub(crate) fn into_params(self) -> Vec<InputParameter> {
        self.params
    }
}

impl From<Vec<InputParameter>> for Batch {
    fn from(params: Vec<InputParameter>) -> Self {
        Self::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_parameter_clones_share_the_cell() {
        let out = OutputParameter::new(SqlType::Varchar);
        let clone = out.clone();
        assert_eq!(out.value(), None);
        clone.store(SqlValue::Text("hello".into()));
        assert_eq!(out.value(), Some(SqlValue::Text("hello".into())));
    }

    #[test]
    fn null_output_stores_as_absent() {
        let out = OutputParameter::new(SqlType::Integer);
        out.store(SqlValue::Null);
        assert_eq!(out.value(), None);
    }

    #[test]
    fn in_out_parameter_exposes_seed_until_overwritten() {
        let p = InOutParameter::new(SqlValue::Text("OldString".into()), SqlType::Varchar);
        assert_eq!(p.value(), Some(SqlValue::Text("OldString".into())));
        p.as_output().store(SqlValue::Text("NewString".into()));
        assert_eq!(p.value(), Some(SqlValue::Text("NewString".into())));
    }
}
