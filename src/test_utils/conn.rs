//! Driver-trait implementations for the in-memory backend.

use std::collections::HashMap;
use std::io::Read;

use crate::driver::{
    NativeConnection, NativeCursor, NativeLob, NativeStatement, SharedByteStream,
};
use crate::error::DriverError;
use crate::results::LobHandle;
use crate::types::{SqlType, SqlValue};

use super::engine::{
    ColumnKind, ParsedSql, Table, compare_values, parse, rows_matching, value_matches_declared,
};
use super::{MemoryDb, ProcCall};

/// One open connection to a [`MemoryDb`].
///
/// Rollback restores the tables captured at the last commit (or at connect),
/// which gives the all-or-nothing visibility the transaction layer expects.
pub struct MemoryConnection {
    db: MemoryDb,
}

impl MemoryConnection {
    pub(crate) fn new(db: MemoryDb) -> Self {
        {
            let mut state = db.lock();
            state.baseline = state.tables.clone();
        }
        Self { db }
    }
}

impl NativeConnection for MemoryConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, DriverError> {
        self.db.take_failure("prepare")?;
        let parsed = parse(sql)?;
        self.db.record_event("prepare");
        Ok(Box::new(MemoryStatement::new(self.db.clone(), parsed)))
    }

    fn prepare_call(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, DriverError> {
        self.db.take_failure("prepare")?;
        let parsed = parse(sql)?;
        if !matches!(parsed, ParsedSql::Call { .. }) {
            return Err(DriverError::new("prepare_call expects a {call ...} statement"));
        }
        self.db.record_event("prepare-call");
        Ok(Box::new(MemoryStatement::new(self.db.clone(), parsed)))
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.db.record_event(format!("set-autocommit({enabled})"));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.db.take_failure("commit")?;
        let mut state = self.db.lock();
        state.baseline = state.tables.clone();
        state.events.push("commit".into());
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.db.take_failure("rollback")?;
        let mut state = self.db.lock();
        state.tables = state.baseline.clone();
        state.events.push("rollback".into());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.db.record_event("connection-closed");
        Ok(())
    }
}

struct MemoryStatement {
    db: MemoryDb,
    parsed: ParsedSql,
    bound: HashMap<usize, SqlValue>,
    out_types: HashMap<usize, SqlType>,
    batch: Vec<HashMap<usize, SqlValue>>,
    outputs: HashMap<usize, SqlValue>,
}

impl MemoryStatement {
    fn new(db: MemoryDb, parsed: ParsedSql) -> Self {
        Self {
            db,
            parsed,
            bound: HashMap::new(),
            out_types: HashMap::new(),
            batch: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    fn insert_row(&self, bound: &HashMap<usize, SqlValue>) -> Result<u64, DriverError> {
        let ParsedSql::Insert {
            table,
            columns,
            placeholders,
        } = &self.parsed
        else {
            return Err(DriverError::new("not an INSERT statement"));
        };
        let strict = self.db.config.strict_types;
        let mut state = self.db.lock();
        let table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DriverError::new(format!("no such table: {table}")))?;

        let positions: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|n| {
                    table
                        .column_position(n)
                        .ok_or_else(|| DriverError::new(format!("no column `{n}`")))
                })
                .collect::<Result<_, _>>()?,
            None => (0..table.columns.len()).collect(),
        };
        if positions.len() != *placeholders {
            return Err(DriverError::new(format!(
                "INSERT lists {} columns but has {placeholders} placeholders",
                positions.len()
            )));
        }

        let mut row = vec![SqlValue::Null; table.columns.len()];
        for (i, column_position) in positions.iter().enumerate() {
            let value = bound
                .get(&(i + 1))
                .cloned()
                .ok_or_else(|| DriverError::new(format!("parameter {} not bound", i + 1)))?;
            if strict && !value_matches_declared(&table.columns[*column_position].declared, &value)
            {
                return Err(DriverError::new(format!(
                    "value kind `{}` does not match column `{}` ({})",
                    value.kind(),
                    table.columns[*column_position].name,
                    table.columns[*column_position].declared
                )));
            }
            row[*column_position] = value;
        }
        table.rows.push(row);
        Ok(1)
    }

    fn run_call(&mut self) -> Result<(Vec<String>, Vec<Vec<SqlValue>>), DriverError> {
        let ParsedSql::Call { name, arg_count } = &self.parsed else {
            return Err(DriverError::new("not a call statement"));
        };
        let procedure = self
            .db
            .lock()
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("no such procedure: {name}")))?;

        let args: Vec<SqlValue> = (1..=*arg_count)
            .map(|p| self.bound.get(&p).cloned().unwrap_or(SqlValue::Null))
            .collect();
        // The lock is released here: procedure bodies may journal events.
        let outcome = procedure(&ProcCall { args })?;
        self.outputs = outcome.outputs;
        Ok((outcome.columns, outcome.rows))
    }

    fn run_select(&self) -> Result<MemoryCursor, DriverError> {
        let ParsedSql::Select {
            columns,
            table,
            where_eq,
            order_by,
        } = &self.parsed
        else {
            return Err(DriverError::new("not a SELECT statement"));
        };
        let state = self.db.lock();
        let table: &Table = state
            .tables
            .get(table)
            .ok_or_else(|| DriverError::new(format!("no such table: {table}")))?;

        let mut rows: Vec<Vec<SqlValue>> = rows_matching(table, where_eq.as_deref(), &self.bound)?
            .into_iter()
            .cloned()
            .collect();
        if let Some((column, ascending)) = order_by {
            let position = table
                .column_position(column)
                .ok_or_else(|| DriverError::new(format!("no column `{column}`")))?;
            rows.sort_by(|a, b| {
                let ordering = compare_values(&a[position], &b[position]);
                if *ascending { ordering } else { ordering.reverse() }
            });
        }

        let projected: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|n| {
                    table
                        .column_position(n)
                        .ok_or_else(|| DriverError::new(format!("no column `{n}`")))
                })
                .collect::<Result<_, _>>()?,
            None => (0..table.columns.len()).collect(),
        };
        let labels = projected
            .iter()
            .map(|&p| table.columns[p].name.clone())
            .collect();
        let kinds = projected.iter().map(|&p| table.columns[p].kind).collect();
        let rows = rows
            .into_iter()
            .map(|row| projected.iter().map(|&p| row[p].clone()).collect())
            .collect();

        Ok(MemoryCursor::new(self.db.clone(), labels, kinds, rows))
    }
}

impl NativeStatement for MemoryStatement {
    fn bind_value(
        &mut self,
        position: usize,
        value: &SqlValue,
        _sql_type: SqlType,
    ) -> Result<(), DriverError> {
        self.db.take_failure("bind")?;
        self.bound.insert(position, value.clone());
        self.db.record_event(format!("bind({position})"));
        Ok(())
    }

    fn bind_null(&mut self, position: usize, _sql_type: SqlType) -> Result<(), DriverError> {
        self.db.take_failure("bind")?;
        self.bound.insert(position, SqlValue::Null);
        self.db.record_event(format!("bind-null({position})"));
        Ok(())
    }

    fn bind_stream(
        &mut self,
        position: usize,
        stream: SharedByteStream,
        sql_type: SqlType,
    ) -> Result<(), DriverError> {
        self.db.take_failure("bind")?;
        // This backend reads the stream eagerly at bind time; the binder
        // still owns the reader and closes it via its scope.
        let mut bytes = Vec::new();
        {
            let mut guard = stream.borrow_mut();
            let reader = guard
                .as_mut()
                .ok_or_else(|| DriverError::new("bound stream was already closed"))?;
            reader
                .read_to_end(&mut bytes)
                .map_err(|e| DriverError::with_source("stream read failed during bind", e))?;
        }
        let value = match sql_type {
            SqlType::Clob => SqlValue::Text(
                String::from_utf8(bytes)
                    .map_err(|e| DriverError::with_source("CLOB stream is not UTF-8", e))?,
            ),
            _ => SqlValue::Blob(bytes),
        };
        self.bound.insert(position, value);
        self.db.record_event(format!("bind-stream({position})"));
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> Result<(), DriverError> {
        if !matches!(self.parsed, ParsedSql::Call { .. }) {
            return Err(DriverError::new(
                "output parameters are only valid on call statements",
            ));
        }
        self.out_types.insert(position, sql_type);
        self.db.record_event(format!("register-out({position})"));
        Ok(())
    }

    fn add_batch(&mut self) -> Result<(), DriverError> {
        self.batch.push(std::mem::take(&mut self.bound));
        self.db.record_event("add-batch");
        Ok(())
    }

    fn execute(&mut self) -> Result<u64, DriverError> {
        self.db.take_failure("execute")?;
        let affected = match &self.parsed {
            ParsedSql::CreateTable {
                name,
                columns,
                if_not_exists,
            } => {
                let mut state = self.db.lock();
                if state.tables.contains_key(name) {
                    if !if_not_exists {
                        return Err(DriverError::new(format!("table already exists: {name}")));
                    }
                } else {
                    state.tables.insert(
                        name.clone(),
                        Table {
                            columns: columns.clone(),
                            rows: Vec::new(),
                        },
                    );
                }
                0
            }
            ParsedSql::Insert { .. } => {
                let bound = std::mem::take(&mut self.bound);
                self.insert_row(&bound)?
            }
            ParsedSql::Delete { table, where_eq } => {
                let bound = self.bound.clone();
                let mut state = self.db.lock();
                let table = state
                    .tables
                    .get_mut(table)
                    .ok_or_else(|| DriverError::new(format!("no such table: {table}")))?;
                let before = table.rows.len();
                match where_eq {
                    None => table.rows.clear(),
                    Some(column) => {
                        let position = table
                            .column_position(column)
                            .ok_or_else(|| DriverError::new(format!("no column `{column}`")))?;
                        let needle = bound
                            .get(&1)
                            .cloned()
                            .ok_or_else(|| DriverError::new("WHERE placeholder not bound"))?;
                        table.rows.retain(|row| row.get(position) != Some(&needle));
                    }
                }
                (before - table.rows.len()) as u64
            }
            ParsedSql::Call { .. } => {
                let (_, rows) = self.run_call()?;
                if !rows.is_empty() {
                    return Err(DriverError::new(
                        "procedure returned rows; use a result-returning call",
                    ));
                }
                0
            }
            ParsedSql::Select { .. } => {
                return Err(DriverError::new("SELECT requires execute_query"));
            }
        };
        self.db.record_event("execute");
        Ok(affected)
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>, DriverError> {
        self.db.take_failure("execute")?;
        if !matches!(self.parsed, ParsedSql::Insert { .. }) {
            return Err(DriverError::new("batch execution requires an INSERT"));
        }
        let batch = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(batch.len());
        for bound in &batch {
            counts.push(self.insert_row(bound)?);
        }
        self.db.record_event("execute-batch");
        Ok(counts)
    }

    fn execute_query(&mut self) -> Result<Box<dyn NativeCursor>, DriverError> {
        self.db.take_failure("execute")?;
        let cursor = match &self.parsed {
            ParsedSql::Select { .. } => self.run_select()?,
            ParsedSql::Call { .. } => {
                let (columns, rows) = self.run_call()?;
                let kinds = vec![ColumnKind::Scalar; columns.len()];
                MemoryCursor::new(self.db.clone(), columns, kinds, rows)
            }
            _ => return Err(DriverError::new("statement does not produce rows")),
        };
        self.db.record_event("execute-query");
        Ok(Box::new(cursor))
    }

    fn out_value(&mut self, position: usize) -> Result<SqlValue, DriverError> {
        if !self.out_types.contains_key(&position) {
            return Err(DriverError::new(format!(
                "position {position} was not registered as an output parameter"
            )));
        }
        self.db.record_event(format!("out-value({position})"));
        Ok(self
            .outputs
            .get(&position)
            .cloned()
            .unwrap_or(SqlValue::Null))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.db.take_failure("statement-close")?;
        self.db.record_event("statement-closed");
        Ok(())
    }
}

struct MemoryCursor {
    db: MemoryDb,
    labels: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<SqlValue>>,
    // 0 = before the first row.
    index: usize,
    closed: bool,
}

impl MemoryCursor {
    fn new(db: MemoryDb, labels: Vec<String>, kinds: Vec<ColumnKind>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            db,
            labels,
            kinds,
            rows,
            index: 0,
            closed: false,
        }
    }
}

impl NativeCursor for MemoryCursor {
    fn advance(&mut self) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::new("advance on a closed cursor"));
        }
        if self.index < self.rows.len() {
            self.index += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn column_count(&self) -> usize {
        self.labels.len()
    }

    fn column_label(&self, position: usize) -> String {
        self.labels.get(position - 1).cloned().unwrap_or_default()
    }

    fn value(&mut self, position: usize) -> Result<SqlValue, DriverError> {
        if self.index == 0 || self.index > self.rows.len() {
            return Err(DriverError::new("cursor is not positioned on a row"));
        }
        let value = self.rows[self.index - 1]
            .get(position - 1)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("no column at position {position}")))?;
        let kind = self
            .kinds
            .get(position - 1)
            .copied()
            .unwrap_or(ColumnKind::Scalar);
        Ok(match (kind, value) {
            (_, SqlValue::Null) => SqlValue::Null,
            (ColumnKind::Blob, SqlValue::Blob(bytes)) => {
                SqlValue::Lob(LobHandle::new(Box::new(MemoryLob::new(self.db.clone(), bytes))))
            }
            (ColumnKind::Clob, SqlValue::Text(text)) => SqlValue::Lob(LobHandle::new(Box::new(
                MemoryLob::new(self.db.clone(), text.into_bytes()),
            ))),
            (_, value) => value,
        })
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if !self.closed {
            self.closed = true;
            self.db.record_event("cursor-closed");
        }
        Ok(())
    }
}

struct MemoryLob {
    db: MemoryDb,
    data: Vec<u8>,
}

impl MemoryLob {
    fn new(db: MemoryDb, data: Vec<u8>) -> Self {
        Self { db, data }
    }
}

impl NativeLob for MemoryLob {
    fn open_stream(&mut self) -> Result<Box<dyn Read>, DriverError> {
        self.db.record_event("lob-opened");
        Ok(Box::new(std::io::Cursor::new(self.data.clone())))
    }

    fn free(&mut self) -> Result<(), DriverError> {
        self.db.record_event("lob-freed");
        Ok(())
    }
}
