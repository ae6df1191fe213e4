//! Transactional execution layer over a synchronous SQL driver.
//!
//! This crate binds typed parameters into statements, executes updates,
//! batches, queries, and stored-procedure calls, and exposes query results as
//! lazily consumed row streams — all inside a single commit-or-rollback
//! transaction boundary. Its defining concern is resource-lifetime and
//! ordering discipline: input streams close exactly once, strictly after the
//! statement that consumed them; output-parameter values become valid only
//! after the call has executed; large-object handles obtained while mapping
//! rows outlive per-row processing but never the owning transaction; and all
//! of this still unwinds correctly when any step fails.
//!
//! The native driver is a collaborator, not a dependency: implement the
//! capability traits in [`driver`] for your backend and hand a
//! [`driver::ConnectionProvider`] to a [`TransactionRunner`].
//!
//! ```no_run
//! use sql_transact::{InputParameter, TransactionRunner};
//! # use sql_transact::driver::{ConnectionProvider, NativeConnection};
//! # struct MyProvider;
//! # impl ConnectionProvider for MyProvider {
//! #     fn connect(&self) -> Result<Box<dyn NativeConnection>, sql_transact::DriverError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # fn provider() -> MyProvider { MyProvider }
//!
//! # fn main() -> Result<(), sql_transact::SqlTransactError> {
//! let runner = TransactionRunner::new(provider());
//! let names = runner.execute_with_result(|handle| {
//!     handle.update(
//!         "INSERT INTO players (id, name) VALUES (?, ?)",
//!         vec![InputParameter::integer(1), InputParameter::string("alice")],
//!     )?;
//!     handle
//!         .query(
//!             "SELECT name FROM players ORDER BY id",
//!             |row| row.as_text("name"),
//!             vec![],
//!         )?
//!         .collect_rows()
//! })?;
//! # let _ = names;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod driver;
pub mod error;
pub mod params;
pub mod prelude;
pub mod query;
pub mod results;
pub mod scope;
pub mod transaction;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use connection::ConnectionHandle;
pub use error::{DriverError, SqlTransactError};
pub use params::{Batch, InOutParameter, InputParameter, OutputParameter, Parameter};
pub use query::RowStream;
pub use results::{LobHandle, Row};
pub use scope::Scope;
pub use transaction::TransactionRunner;
pub use types::{SqlType, SqlValue};
