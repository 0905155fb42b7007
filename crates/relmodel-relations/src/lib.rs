//! Relation registry, nested mutations, and join composition.
//!
//! This crate is the relation engine on top of `relmodel-core` and
//! `relmodel-query`:
//!
//! - [`RelationRegistry`] resolves relation descriptors, deferring
//!   `through` references until their dependencies register
//! - [`plan_create`] / [`plan_update`] validate nested payloads and split
//!   them around the primary statement
//! - the executors apply the nested operations per relation kind
//! - [`Db`] / [`Table`] tie it together over any [`relmodel_core::Connection`]
//! - [`chain_query`] / [`reverse_join`] compose relation accesses as
//!   nested `EXISTS` conditions

/// Unwrap an `Outcome`, propagating the non-`Ok` arms.
macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            asupersync::Outcome::Ok(v) => v,
            asupersync::Outcome::Err(e) => return asupersync::Outcome::Err(e.into()),
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning an `Outcome`.
macro_rules! try_result {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return asupersync::Outcome::Err(e.into()),
        }
    };
}

/// Unwrap an `Outcome` inside a coordinated call: any non-`Ok` arm rolls
/// the call-scoped transaction back before propagating.
macro_rules! try_tx {
    ($coord:expr, $cx:expr, $e:expr) => {{
        let out = $e;
        match out {
            asupersync::Outcome::Ok(v) => v,
            asupersync::Outcome::Err(e) => return $coord.fail($cx, e.into()).await,
            asupersync::Outcome::Cancelled(r) => {
                $coord.abort($cx).await;
                return asupersync::Outcome::Cancelled(r);
            }
            asupersync::Outcome::Panicked(p) => {
                $coord.abort($cx).await;
                return asupersync::Outcome::Panicked(p);
            }
        }
    }};
}

pub(crate) use {try_outcome, try_result, try_tx};

pub mod coordinator;
pub mod descriptor;
mod executor;
pub mod hooks;
pub mod join;
pub mod payload;
pub mod registry;
pub mod source;
pub mod testing;

pub use coordinator::Coordinator;
pub use descriptor::{
    JoinTableKeys, KeyPair, RelationDescriptor, RelationKeys, RelationKind, ResolvedRelation,
};
pub use hooks::{MutationPlan, ScheduledAction, plan_create, plan_update};
pub use join::{chain_query, join_predicate, related_query, reverse_join, scope_criteria};
pub use payload::{
    ConnectOrCreate, Criteria, MutationContext, MutationRow, NestedOp, NestedUpdate, Record,
    TargetSet, check_allowed,
};
pub use registry::{RelationMap, RelationRegistry};
pub use source::{Db, RelationAccessor, Table};
