//! Core types and traits for relmodel.
//!
//! This crate provides the foundational abstractions the relation engine
//! builds on:
//!
//! - `Value` for dynamically-typed SQL parameters and results
//! - `Row` for query results with shared column metadata
//! - `Connection` / `TransactionOps` traits for database drivers
//! - `Dialect` for placeholder and identifier rendering
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod error;
pub mod row;
pub mod value;

pub use connection::{
    Connection, ConnectionConfig, Dialect, IsolationLevel, SslMode, Transaction,
    TransactionInternal, TransactionOps,
};
pub use error::{
    BatchNotAllowedError, ConnectionError, ConnectionErrorKind, Error, MultipleRecordsError,
    NotFoundError, QueryError, QueryErrorKind, RelationConfigError, Result, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
