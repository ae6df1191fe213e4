use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

use crate::error::SqlTransactError;
use crate::results::LobHandle;

/// SQL type tag used when binding parameters.
///
/// The tag matters most for typed nulls and registered output parameters,
/// where the value alone does not identify the column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    TinyInt,
    Integer,
    BigInt,
    Real,
    Double,
    Boolean,
    Varchar,
    Date,
    Time,
    Timestamp,
    Decimal,
    Json,
    Blob,
    Clob,
    LongVarbinary,
}

/// Values that can be bound as parameters or read back from result rows.
///
/// This enum is the single representation of database values used across the
/// whole layer: parameter cells carry one, rows snapshot a vector of them, and
/// output parameters are populated with one.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Integer value (64-bit; narrower integer kinds widen into this).
    Int(i64),
    /// Floating point value (64-bit).
    Float(f64),
    /// Text/string value.
    Text(String),
    /// Boolean value.
    Bool(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Date and time, no zone.
    Timestamp(NaiveDateTime),
    /// Exact decimal, kept in canonical text form.
    Decimal(String),
    /// JSON document.
    Json(JsonValue),
    /// Binary data, fully materialized.
    Blob(Vec<u8>),
    /// Driver-native large-object handle; content is read via
    /// [`LobHandle::read`] or [`crate::Row::read_lob`], never eagerly.
    Lob(LobHandle),
    /// NULL value.
    Null,
}

impl SqlValue {
    /// Short name of this value's kind, used in coercion errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Int(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Json(_) => "json",
            SqlValue::Blob(_) => "blob",
            SqlValue::Lob(_) => "large-object",
            SqlValue::Null => "null",
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn coercion(&self, to: &'static str) -> SqlTransactError {
        SqlTransactError::Coercion {
            value: self.display_for_error(),
            from: self.kind(),
            to,
        }
    }

    fn display_for_error(&self) -> String {
        match self {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
            SqlValue::Lob(_) => "<large object>".to_string(),
            other => format!("{other:?}"),
        }
    }

    /// Coerce to `i64`: identity for integers, truncation for floats, parse
    /// for text and decimals, 0/1 for booleans.
    pub fn as_i64(&self) -> Result<Option<i64>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            SqlValue::Float(f) if f.is_finite() => Ok(Some(f.trunc() as i64)),
            SqlValue::Bool(b) => Ok(Some(i64::from(*b))),
            SqlValue::Text(s) | SqlValue::Decimal(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.coercion("i64")),
            _ => Err(self.coercion("i64")),
        }
    }

    /// Coerce to `i32`, failing on out-of-range values.
    pub fn as_i32(&self) -> Result<Option<i32>, SqlTransactError> {
        match self.as_i64()? {
            None => Ok(None),
            Some(v) => i32::try_from(v).map(Some).map_err(|_| self.coercion("i32")),
        }
    }

    /// Coerce to `i8`, failing on out-of-range values.
    pub fn as_i8(&self) -> Result<Option<i8>, SqlTransactError> {
        match self.as_i64()? {
            None => Ok(None),
            Some(v) => i8::try_from(v).map(Some).map_err(|_| self.coercion("i8")),
        }
    }

    /// Coerce to `f64`: identity for floats, widening for integers, parse for
    /// text and decimals.
    pub fn as_f64(&self) -> Result<Option<f64>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Float(f) => Ok(Some(*f)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            SqlValue::Text(s) | SqlValue::Decimal(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.coercion("f64")),
            _ => Err(self.coercion("f64")),
        }
    }

    /// Coerce to `f32` by narrowing the `f64` coercion.
    pub fn as_f32(&self) -> Result<Option<f32>, SqlTransactError> {
        Ok(self.as_f64()?.map(|v| v as f32))
    }

    /// Coerce to `bool`: identity, 0/1 integers, or the usual text spellings.
    pub fn as_bool(&self) -> Result<Option<bool>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Bool(b) => Ok(Some(*b)),
            SqlValue::Int(0) => Ok(Some(false)),
            SqlValue::Int(1) => Ok(Some(true)),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Some(true)),
                "false" | "f" | "0" => Ok(Some(false)),
                _ => Err(self.coercion("bool")),
            },
            _ => Err(self.coercion("bool")),
        }
    }

    /// Coerce to text: identity for text, display form for the scalar kinds.
    pub fn as_text(&self) -> Result<Option<String>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) | SqlValue::Decimal(s) => Ok(Some(s.clone())),
            SqlValue::Int(v) => Ok(Some(v.to_string())),
            SqlValue::Float(f) => Ok(Some(f.to_string())),
            SqlValue::Bool(b) => Ok(Some(b.to_string())),
            SqlValue::Date(d) => Ok(Some(d.format("%Y-%m-%d").to_string())),
            SqlValue::Time(t) => Ok(Some(t.format("%H:%M:%S%.f").to_string())),
            SqlValue::Timestamp(ts) => Ok(Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
            SqlValue::Json(j) => Ok(Some(j.to_string())),
            _ => Err(self.coercion("text")),
        }
    }

    /// Coerce to a calendar date: identity, the date part of a timestamp, or
    /// parse from `YYYY-MM-DD` text.
    pub fn as_date(&self) -> Result<Option<NaiveDate>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Date(d) => Ok(Some(*d)),
            SqlValue::Timestamp(ts) => Ok(Some(ts.date())),
            SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(|_| self.coercion("date")),
            _ => Err(self.coercion("date")),
        }
    }

    /// Coerce to a time of day: identity, the time part of a timestamp, or
    /// parse from `HH:MM:SS[.fff]` text.
    pub fn as_time(&self) -> Result<Option<NaiveTime>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Time(t) => Ok(Some(*t)),
            SqlValue::Timestamp(ts) => Ok(Some(ts.time())),
            SqlValue::Text(s) => {
                let s = s.trim();
                NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
                    .map(Some)
                    .map_err(|_| self.coercion("time"))
            }
            _ => Err(self.coercion("time")),
        }
    }

    /// Coerce to a timestamp: identity, midnight of a date, or parse from
    /// `YYYY-MM-DD HH:MM:SS[.fff]` text.
    pub fn as_timestamp(&self) -> Result<Option<NaiveDateTime>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            SqlValue::Date(d) => Ok(Some(d.and_hms_opt(0, 0, 0).unwrap_or_default())),
            SqlValue::Text(s) => {
                let s = s.trim();
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .map(Some)
                    .map_err(|_| self.coercion("timestamp"))
            }
            _ => Err(self.coercion("timestamp")),
        }
    }

    /// Coerce to a canonical decimal string.
    pub fn as_decimal(&self) -> Result<Option<String>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Decimal(s) => Ok(Some(s.clone())),
            SqlValue::Int(v) => Ok(Some(v.to_string())),
            SqlValue::Float(f) => Ok(Some(f.to_string())),
            SqlValue::Text(s) => {
                let t = s.trim();
                t.parse::<f64>()
                    .map(|_| Some(t.to_string()))
                    .map_err(|_| self.coercion("decimal"))
            }
            _ => Err(self.coercion("decimal")),
        }
    }

    /// Coerce to raw bytes. Only materialized blobs qualify; large-object
    /// handles must be read through [`LobHandle::read`] instead.
    pub fn as_bytes(&self) -> Result<Option<Vec<u8>>, SqlTransactError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Blob(b) => Ok(Some(b.clone())),
            _ => Err(self.coercion("bytes")),
        }
    }

    /// Borrow the JSON document, if this value is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&JsonValue> {
        if let SqlValue::Json(j) = self {
            Some(j)
        } else {
            None
        }
    }

    /// Borrow the large-object handle, if this value is one.
    #[must_use]
    pub fn as_lob(&self) -> Option<&LobHandle> {
        if let SqlValue::Lob(h) = self {
            Some(h)
        } else {
            None
        }
    }
}
