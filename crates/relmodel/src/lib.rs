//! relmodel - relational mapping over any SQL backend.
//!
//! relmodel sits between an application and a database driver and provides:
//!
//! - A relation registry: declare `belongs_to` / `has_one` / `has_many` /
//!   `has_and_belongs_to_many` links between tables, including derived
//!   (`through`) relations resolved in any registration order
//! - Nested mutations: create or update a row and its related rows in one
//!   call (`create`, `connect`, `connect_or_create`, `disconnect`, `set`,
//!   `delete`, `update`, `upsert`), all-or-nothing under a transaction
//! - Join composition: turn relation traversals into nested `EXISTS`
//!   predicates instead of JOINs, so composed filters never duplicate rows
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! fn relations() -> Result<RelationMap> {
//!     let mut registry = RelationRegistry::new();
//!     registry.register(
//!         "users",
//!         "posts",
//!         RelationDescriptor::has_many("posts").keys("id", "user_id"),
//!     )?;
//!     registry.register(
//!         "posts",
//!         "author",
//!         RelationDescriptor::belongs_to("users").keys("user_id", "id"),
//!     )?;
//!     registry.finish()
//! }
//!
//! async fn example(cx: &Cx, conn: impl Connection) -> Outcome<(), Error> {
//!     let db = Db::new(conn, relations()?);
//!
//!     // Create a user together with two posts; both inserts commit or
//!     // neither does.
//!     let payload = MutationRow::new(Record::new().set("name", "Alice")).relate(
//!         "posts",
//!         NestedOp::Create(vec![
//!             Record::new().set("title", "first"),
//!             Record::new().set("title", "second"),
//!         ]),
//!     );
//!     let user = db.table("users").create(cx, payload).await?;
//!
//!     // Users with at least one post titled "first", via EXISTS.
//!     let posts = SelectQuery::new("posts").and_where(Expr::col("title").eq("first"));
//!     let filter = db.relation("users", "posts")?.filter(posts);
//!     let users = db.table("users").select(cx, Criteria::new()).await?;
//!     Outcome::Ok(())
//! }
//! ```

pub use relmodel_core::connection::{ConnectionConfig, SslMode, Transaction};
pub use relmodel_core::{
    // asupersync re-exports
    Budget,
    ColumnInfo,
    // Core types
    Connection,
    Cx,
    Dialect,
    Error,
    FromValue,
    IsolationLevel,
    Outcome,
    RegionId,
    Result,
    Row,
    TaskId,
    TransactionOps,
    Value,
};

pub use relmodel_core::error::{
    BatchNotAllowedError, MultipleRecordsError, NotFoundError, QueryError, QueryErrorKind,
    RelationConfigError, TransactionError, TransactionErrorKind,
};

pub use relmodel_query::{
    DeleteQuery, Expr, InsertQuery, OrderBy, OrderDirection, SelectQuery, UpdateQuery, Where,
};

pub use relmodel_relations::{
    chain_query, check_allowed, join_predicate, plan_create, plan_update, related_query,
    reverse_join, scope_criteria, ConnectOrCreate, Coordinator, Criteria, Db, JoinTableKeys,
    KeyPair, MutationContext, MutationPlan, MutationRow, NestedOp, NestedUpdate, Record,
    RelationAccessor, RelationDescriptor, RelationKeys, RelationKind, RelationMap,
    RelationRegistry, ResolvedRelation, ScheduledAction, Table, TargetSet,
};

/// Scripted in-memory connection for tests; see
/// [`relmodel_relations::testing`].
pub use relmodel_relations::testing;

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        Connection, Criteria, Cx, Db, Dialect, Error, Expr, MutationRow, NestedOp, Outcome,
        Record, RelationDescriptor, RelationMap, RelationRegistry, Result, Row, SelectQuery,
        Table, TargetSet, TransactionOps, Value,
    };
}
