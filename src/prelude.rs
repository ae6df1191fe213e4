//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so callers can get
//! started with a single `use sql_transact::prelude::*;`.

pub use crate::connection::ConnectionHandle;
pub use crate::driver::{
    ConnectionProvider, NativeConnection, NativeCursor, NativeLob, NativeStatement,
};
pub use crate::error::{DriverError, SqlTransactError};
pub use crate::params::{Batch, InOutParameter, InputParameter, OutputParameter, Parameter};
pub use crate::query::RowStream;
pub use crate::results::{LobHandle, Row};
pub use crate::scope::Scope;
pub use crate::transaction::TransactionRunner;
pub use crate::types::{SqlType, SqlValue};

#[cfg(feature = "test-utils")]
pub use crate::test_utils::{MemoryConfig, MemoryDb, ProcCall, ProcOutcome};
