//! `belongs_to` execution.
//!
//! The foreign key lives on the rows being written, so related rows must
//! be resolved *before* the primary statement: lookups and creates run
//! first and the resulting key values are patched into the pending
//! records, letting the primary INSERT/UPDATE carry them in one pass.

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Error, NotFoundError, Row, Value};
use relmodel_query::{DeleteQuery, UpdateQuery, Where};

use crate::coordinator::Coordinator;
use crate::descriptor::ResolvedRelation;
use crate::payload::{Criteria, NestedOp, Record, TargetSet};
use crate::{try_outcome, try_result};

use super::{
    describe_criteria, fetch_candidates, insert_returning, insert_single, or_criteria_expr,
    patch_owner_keys,
};

/// Related-table work deferred until after the primary statement.
///
/// Deleting an old parent must wait until the owning rows no longer point
/// at it, or the delete would trip the foreign key constraint.
#[derive(Debug)]
pub(crate) enum PostAction {
    DeleteRelated { table: String, groups: Vec<Criteria> },
}

pub(crate) async fn run_post_action<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    action: PostAction,
) -> Outcome<(), Error> {
    match action {
        PostAction::DeleteRelated { table, groups } => {
            let Some(expr) = or_criteria_expr(None, &groups) else {
                return Outcome::Ok(());
            };
            let (sql, params) = DeleteQuery::new(&table)
                .filter(Where::new(expr))
                .build_with_dialect(coord.dialect());
            let deleted = try_outcome!(coord.execute(cx, &sql, &params).await);
            tracing::debug!(table, deleted, "deleted detached parent rows");
            Outcome::Ok(())
        }
    }
}

/// Create path. Resolves every item's target row with at most one SELECT
/// and one batched INSERT, then patches the foreign keys into `rows`.
#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name))]
pub(crate) async fn before_create<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    items: &[(usize, NestedOp)],
    rows: &mut [Record],
) -> Outcome<(), Error> {
    // (row index, criteria, record to insert on a miss)
    let mut lookups: Vec<(usize, &Criteria, Option<&Record>)> = Vec::new();
    let mut creates: Vec<(usize, Record)> = Vec::new();

    for (idx, op) in items {
        match op {
            NestedOp::Connect(criteria) => {
                if let Some(c) = criteria.first() {
                    lookups.push((*idx, c, None));
                }
            }
            NestedOp::ConnectOrCreate(entries) => {
                if let Some(entry) = entries.first() {
                    lookups.push((*idx, &entry.matching, Some(&entry.create)));
                }
            }
            NestedOp::Create(records) => {
                if let Some(record) = records.first() {
                    creates.push((*idx, record.clone()));
                }
            }
            other => {
                // Planning already rejected these; keep the invariant loud.
                debug_assert!(false, "unexpected op '{}' in belongs_to create", other.name());
            }
        }
    }

    let mut resolved: Vec<(usize, Row)> = Vec::new();
    if !lookups.is_empty() {
        let groups: Vec<Criteria> = lookups.iter().map(|(_, c, _)| (*c).clone()).collect();
        let candidates =
            try_outcome!(fetch_candidates(cx, coord, &rel.related_table, &groups).await);
        for (idx, criteria, on_miss) in lookups {
            match candidates.iter().find(|row| criteria.matches_row(row)) {
                Some(row) => resolved.push((idx, row.clone())),
                None => match on_miss {
                    Some(record) => creates.push((idx, record.clone())),
                    None => {
                        return Outcome::Err(Error::NotFound(NotFoundError {
                            table: rel.related_table.clone(),
                            message: describe_criteria(criteria),
                        }));
                    }
                },
            }
        }
    }

    let created = try_outcome!(insert_returning(cx, coord, &rel.related_table, creates).await);
    resolved.extend(created);

    for (idx, related_row) in resolved {
        try_result!(patch_owner_keys(rel, &mut rows[idx], &related_row));
    }
    Outcome::Ok(())
}

/// Update path. Runs before the primary UPDATE: resolves or writes related
/// rows, mutates `patch` so the primary statement carries any key change,
/// and hands back work that must wait until after it.
///
/// `snapshot` holds the affected rows as read before the update; old key
/// values come from there.
#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name, op = op.name()))]
pub(crate) async fn before_update<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    op: &NestedOp,
    patch: &mut Record,
    snapshot: &[Row],
) -> Outcome<Option<PostAction>, Error> {
    match op {
        NestedOp::Connect(criteria) | NestedOp::Set(criteria) => {
            let Some(criteria) = criteria.first() else {
                // Setting the empty target set detaches, like the to-many
                // kinds; an empty connect has nothing to resolve.
                if matches!(op, NestedOp::Set(_)) {
                    clear_keys(rel, patch);
                }
                return Outcome::Ok(None);
            };
            let candidates = try_outcome!(
                fetch_candidates(cx, coord, &rel.related_table, std::slice::from_ref(criteria))
                    .await
            );
            let Some(row) = candidates.iter().find(|row| criteria.matches_row(row)) else {
                return Outcome::Err(Error::NotFound(NotFoundError {
                    table: rel.related_table.clone(),
                    message: describe_criteria(criteria),
                }));
            };
            try_result!(patch_owner_keys(rel, patch, row));
            Outcome::Ok(None)
        }
        NestedOp::ConnectOrCreate(entries) => {
            let Some(entry) = entries.first() else {
                return Outcome::Ok(None);
            };
            let candidates = try_outcome!(
                fetch_candidates(
                    cx,
                    coord,
                    &rel.related_table,
                    std::slice::from_ref(&entry.matching)
                )
                .await
            );
            let row = match candidates.iter().find(|row| entry.matching.matches_row(row)) {
                Some(row) => row.clone(),
                None => {
                    try_outcome!(
                        insert_single(cx, coord, &rel.related_table, entry.create.clone()).await
                    )
                }
            };
            try_result!(patch_owner_keys(rel, patch, &row));
            Outcome::Ok(None)
        }
        NestedOp::Create(records) => {
            let Some(record) = records.first() else {
                return Outcome::Ok(None);
            };
            let row =
                try_outcome!(insert_single(cx, coord, &rel.related_table, record.clone()).await);
            try_result!(patch_owner_keys(rel, patch, &row));
            Outcome::Ok(None)
        }
        NestedOp::Disconnect(_) => {
            clear_keys(rel, patch);
            Outcome::Ok(None)
        }
        NestedOp::Delete(target) => {
            let groups = try_result!(old_key_groups(rel, snapshot, target));
            clear_keys(rel, patch);
            if groups.is_empty() {
                Outcome::Ok(None)
            } else {
                Outcome::Ok(Some(PostAction::DeleteRelated {
                    table: rel.related_table.clone(),
                    groups,
                }))
            }
        }
        NestedOp::Update(items) => {
            // The related rows are untouched by the primary statement, so
            // patching them against the snapshot keys can run right away.
            for item in items {
                let groups = try_result!(old_key_groups(rel, snapshot, &TargetSet::All));
                let Some(mut expr) = or_criteria_expr(None, &groups) else {
                    continue;
                };
                if let Some(matching) = item.matching.as_ref().and_then(|m| m.to_expr(None)) {
                    expr = expr.paren().and(matching);
                }
                let mut update = UpdateQuery::new(&rel.related_table);
                for (column, value) in item.data.entries() {
                    update = update.set(column.clone(), value.clone());
                }
                let (sql, params) =
                    update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
                try_outcome!(coord.execute(cx, &sql, &params).await);
            }
            Outcome::Ok(None)
        }
        NestedOp::Upsert { update, create } => {
            let groups = try_result!(old_key_groups(rel, snapshot, &TargetSet::All));
            if let Some(expr) = or_criteria_expr(None, &groups) {
                let mut query = UpdateQuery::new(&rel.related_table);
                for (column, value) in update.entries() {
                    query = query.set(column.clone(), value.clone());
                }
                let (sql, params) =
                    query.filter(Where::new(expr)).build_with_dialect(coord.dialect());
                let affected = try_outcome!(coord.execute(cx, &sql, &params).await);
                if affected > 0 {
                    return Outcome::Ok(None);
                }
            }
            let row =
                try_outcome!(insert_single(cx, coord, &rel.related_table, create.clone()).await);
            try_result!(patch_owner_keys(rel, patch, &row));
            Outcome::Ok(None)
        }
    }
}

fn clear_keys(rel: &ResolvedRelation, patch: &mut Record) {
    for pair in &rel.key_pairs {
        patch.insert(pair.owner.clone(), Value::Null);
    }
}

/// Criteria over the related table's key columns, one group per snapshot
/// row that actually points somewhere. `Matching` intersects each group
/// with the caller's criteria.
fn old_key_groups(
    rel: &ResolvedRelation,
    snapshot: &[Row],
    target: &TargetSet,
) -> relmodel_core::Result<Vec<Criteria>> {
    let mut base = Vec::new();
    'rows: for row in snapshot {
        let mut criteria = Criteria::new();
        for pair in &rel.key_pairs {
            let value = row.require(&pair.owner)?.clone();
            if value.is_null() {
                continue 'rows;
            }
            criteria = criteria.eq(pair.related.clone(), value);
        }
        if !criteria.is_empty() {
            base.push(criteria);
        }
    }
    match target {
        TargetSet::All => Ok(base),
        TargetSet::Matching(extra) => {
            let mut out = Vec::new();
            for keys in &base {
                for narrow in extra {
                    let mut combined = keys.clone();
                    for (column, value) in narrow.entries() {
                        combined = combined.eq(column.clone(), value.clone());
                    }
                    out.push(combined);
                }
            }
            Ok(out)
        }
    }
}
