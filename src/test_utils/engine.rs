//! Statement grammar and table storage for the in-memory driver.

use std::cmp::Ordering;
use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::DriverError;
use crate::types::SqlValue;

/// How a column surfaces its values through a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Scalar,
    Blob,
    Clob,
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub(crate) name: String,
    pub(crate) declared: String,
    pub(crate) kind: ColumnKind,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: Vec<Vec<SqlValue>>,
}

impl Table {
    pub(crate) fn column_position(&self, name: &str) -> Option<usize> {
        let lowered = name.to_lowercase();
        self.columns.iter().position(|c| c.name == lowered)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ParsedSql {
    CreateTable {
        name: String,
        columns: Vec<Column>,
        if_not_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        placeholders: usize,
    },
    Select {
        columns: Option<Vec<String>>,
        table: String,
        where_eq: Option<String>,
        order_by: Option<(String, bool)>,
    },
    Delete {
        table: String,
        where_eq: Option<String>,
    },
    Call {
        name: String,
        arg_count: usize,
    },
}

lazy_static! {
    static ref CREATE_RE: Regex = Regex::new(
        r"(?is)^\s*create\s+table\s+(if\s+not\s+exists\s+)?([a-z_][a-z0-9_]*)\s*\((.*)\)\s*;?\s*$"
    )
    .expect("valid create-table regex");
    static ref INSERT_RE: Regex = Regex::new(
        r"(?is)^\s*insert\s+into\s+([a-z_][a-z0-9_]*)\s*(?:\(([^)]*)\)\s*)?values\s*\(([^)]*)\)\s*;?\s*$"
    )
    .expect("valid insert regex");
    static ref SELECT_RE: Regex = Regex::new(
        r"(?is)^\s*select\s+(.*?)\s+from\s+([a-z_][a-z0-9_]*)(?:\s+where\s+([a-z_][a-z0-9_]*)\s*=\s*\?)?(?:\s+order\s+by\s+([a-z_][a-z0-9_]*)(\s+desc|\s+asc)?)?\s*;?\s*$"
    )
    .expect("valid select regex");
    static ref DELETE_RE: Regex = Regex::new(
        r"(?is)^\s*delete\s+from\s+([a-z_][a-z0-9_]*)(?:\s+where\s+([a-z_][a-z0-9_]*)\s*=\s*\?)?\s*;?\s*$"
    )
    .expect("valid delete regex");
    static ref CALL_RE: Regex = Regex::new(
        r"(?is)^\s*\{?\s*call\s+([a-z_][a-z0-9_]*)\s*\(([^)]*)\)\s*\}?\s*;?\s*$"
    )
    .expect("valid call regex");
}

/// Parse one statement of the restricted grammar.
pub(crate) fn parse(sql: &str) -> Result<ParsedSql, DriverError> {
    if let Some(caps) = CALL_RE.captures(sql) {
        let args = caps[2].trim();
        let arg_count = if args.is_empty() {
            0
        } else {
            args.split(',').count()
        };
        return Ok(ParsedSql::Call {
            name: caps[1].to_lowercase(),
            arg_count,
        });
    }
    if let Some(caps) = CREATE_RE.captures(sql) {
        let columns = parse_columns(&caps[3])?;
        return Ok(ParsedSql::CreateTable {
            name: caps[2].to_lowercase(),
            columns,
            if_not_exists: caps.get(1).is_some(),
        });
    }
    if let Some(caps) = INSERT_RE.captures(sql) {
        let columns = caps.get(2).map(|list| {
            list.as_str()
                .split(',')
                .map(|c| c.trim().to_lowercase())
                .collect::<Vec<_>>()
        });
        let values = caps[3].trim();
        let placeholders = if values.is_empty() {
            0
        } else {
            values.split(',').count()
        };
        if values.split(',').any(|v| v.trim() != "?") {
            return Err(DriverError::new(
                "memory driver only supports placeholder values in INSERT",
            ));
        }
        return Ok(ParsedSql::Insert {
            table: caps[1].to_lowercase(),
            columns,
            placeholders,
        });
    }
    if let Some(caps) = SELECT_RE.captures(sql) {
        let projection = caps[1].trim();
        let columns = if projection == "*" {
            None
        } else {
            Some(
                projection
                    .split(',')
                    .map(|c| c.trim().to_lowercase())
                    .collect::<Vec<_>>(),
            )
        };
        return Ok(ParsedSql::Select {
            columns,
            table: caps[2].to_lowercase(),
            where_eq: caps.get(3).map(|m| m.as_str().to_lowercase()),
            order_by: caps.get(4).map(|m| {
                let descending = caps
                    .get(5)
                    .is_some_and(|d| d.as_str().trim().eq_ignore_ascii_case("desc"));
                (m.as_str().to_lowercase(), !descending)
            }),
        });
    }
    if let Some(caps) = DELETE_RE.captures(sql) {
        return Ok(ParsedSql::Delete {
            table: caps[1].to_lowercase(),
            where_eq: caps.get(2).map(|m| m.as_str().to_lowercase()),
        });
    }
    Err(DriverError::new(format!(
        "memory driver cannot parse statement: {sql}"
    )))
}

fn parse_columns(defs: &str) -> Result<Vec<Column>, DriverError> {
    let mut columns = Vec::new();
    for def in defs.split(',') {
        let def = def.trim();
        if def.is_empty() {
            continue;
        }
        let mut parts = def.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| DriverError::new("empty column definition"))?
            .to_lowercase();
        let declared = parts.collect::<Vec<_>>().join(" ").to_lowercase();
        let kind = if declared.contains("blob") {
            ColumnKind::Blob
        } else if declared.contains("clob") {
            ColumnKind::Clob
        } else {
            ColumnKind::Scalar
        };
        columns.push(Column {
            name,
            declared,
            kind,
        });
    }
    if columns.is_empty() {
        return Err(DriverError::new("CREATE TABLE with no columns"));
    }
    Ok(columns)
}

/// Loose declared-type check used when `strict_types` is on.
pub(crate) fn value_matches_declared(declared: &str, value: &SqlValue) -> bool {
    if value.is_null() {
        return true;
    }
    if declared.contains("blob") {
        return matches!(value, SqlValue::Blob(_));
    }
    if declared.contains("clob") || declared.contains("char") || declared.contains("text") {
        return matches!(value, SqlValue::Text(_));
    }
    if declared.contains("bool") {
        return matches!(value, SqlValue::Bool(_) | SqlValue::Int(0 | 1));
    }
    if declared.contains("timestamp") || declared.contains("datetime") {
        return matches!(value, SqlValue::Timestamp(_) | SqlValue::Text(_));
    }
    if declared.contains("date") {
        return matches!(value, SqlValue::Date(_) | SqlValue::Text(_));
    }
    if declared.contains("time") {
        return matches!(value, SqlValue::Time(_) | SqlValue::Text(_));
    }
    if declared.contains("decimal") || declared.contains("numeric") {
        return matches!(
            value,
            SqlValue::Decimal(_) | SqlValue::Int(_) | SqlValue::Float(_)
        );
    }
    if declared.contains("real") || declared.contains("double") || declared.contains("float") {
        return matches!(value, SqlValue::Float(_) | SqlValue::Int(_));
    }
    if declared.contains("int") {
        return matches!(value, SqlValue::Int(_) | SqlValue::Bool(_));
    }
    // Unknown declared types accept anything.
    true
}

/// Row filter for `WHERE col = ?`.
pub(crate) fn rows_matching<'t>(
    table: &'t Table,
    where_eq: Option<&str>,
    bound: &HashMap<usize, SqlValue>,
) -> Result<Vec<&'t Vec<SqlValue>>, DriverError> {
    match where_eq {
        None => Ok(table.rows.iter().collect()),
        Some(column) => {
            let position = table
                .column_position(column)
                .ok_or_else(|| DriverError::new(format!("no column `{column}`")))?;
            let needle = bound
                .get(&1)
                .ok_or_else(|| DriverError::new("WHERE placeholder not bound"))?;
            Ok(table
                .rows
                .iter()
                .filter(|row| row.get(position) == Some(needle))
                .collect())
        }
    }
}

/// Total-ish ordering over the value kinds the grammar can ORDER BY.
pub(crate) fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Less,
        (_, SqlValue::Null) => Ordering::Greater,
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::Float(x), SqlValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SqlValue::Int(x), SqlValue::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (SqlValue::Float(x), SqlValue::Int(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.cmp(y),
        (SqlValue::Date(x), SqlValue::Date(y)) => x.cmp(y),
        (SqlValue::Time(x), SqlValue::Time(y)) => x.cmp(y),
        (SqlValue::Timestamp(x), SqlValue::Timestamp(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_supported_statements() {
        assert!(matches!(
            parse("CREATE TABLE t (a int, b text)").unwrap(),
            ParsedSql::CreateTable { ref name, ref columns, .. } if name == "t" && columns.len() == 2
        ));
        assert!(matches!(
            parse("INSERT INTO t (a, b) VALUES (?, ?)").unwrap(),
            ParsedSql::Insert { placeholders: 2, .. }
        ));
        assert!(matches!(
            parse("SELECT a, b FROM t WHERE a = ? ORDER BY a DESC").unwrap(),
            ParsedSql::Select {
                where_eq: Some(_),
                order_by: Some((_, false)),
                ..
            }
        ));
        assert!(matches!(
            parse("{call touch_points(?, ?)}").unwrap(),
            ParsedSql::Call { arg_count: 2, .. }
        ));
    }

    #[test]
    fn rejects_literal_insert_values() {
        assert!(parse("INSERT INTO t VALUES (1, 'x')").is_err());
    }

    #[test]
    fn blob_and_clob_columns_are_recognized() {
        let ParsedSql::CreateTable { columns, .. } =
            parse("create table t (payload blob, notes clob, n int)").unwrap()
        else {
            panic!("expected create table");
        };
        assert_eq!(columns[0].kind, ColumnKind::Blob);
        assert_eq!(columns[1].kind, ColumnKind::Clob);
        assert_eq!(columns[2].kind, ColumnKind::Scalar);
    }
}
