//! SQL statement builders for relmodel.
//!
//! Statements are described as data and rendered against a [`Dialect`]
//! at execution time, so the same query description works across
//! backends with different placeholder syntax.
//!
//! - [`Expr`] - predicate AST (comparisons, boolean composition, EXISTS)
//! - [`SelectQuery`] - SELECT description with deferred dialect rendering
//! - [`InsertQuery`] / [`UpdateQuery`] / [`DeleteQuery`] - write statements

pub mod clause;
pub mod expr;
pub mod select;
pub mod write;

pub use clause::{Limit, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Expr};
pub use relmodel_core::Dialect;
pub use select::SelectQuery;
pub use write::{DeleteQuery, InsertQuery, UpdateQuery};
