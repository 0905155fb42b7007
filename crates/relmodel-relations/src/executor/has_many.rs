//! `has_many` execution.
//!
//! The foreign key lives on the related table, so everything here runs
//! *after* the primary statement, once the parent rows (and their
//! database-assigned keys) are known.

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Error, NotFoundError, Row, Value};
use relmodel_query::{DeleteQuery, Expr, UpdateQuery, Where};

use crate::coordinator::Coordinator;
use crate::descriptor::ResolvedRelation;
use crate::payload::{Criteria, NestedOp, Record, TargetSet};
use crate::{try_outcome, try_result};

use super::{
    describe_criteria, fetch_candidates, insert_plain, or_criteria_expr, parent_scope_expr,
    patch_child_keys,
};

/// Create path: attach children to freshly inserted parents. `parents[i]`
/// is the inserted row for payload row `i`.
#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name))]
pub(crate) async fn after_create<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    items: &[(usize, NestedOp)],
    parents: &[Row],
) -> Outcome<(), Error> {
    let mut creates: Vec<Record> = Vec::new();

    for (idx, op) in items {
        let parent = &parents[*idx];
        match op {
            NestedOp::Create(records) => {
                for record in records {
                    let mut child = record.clone();
                    try_result!(patch_child_keys(rel, &mut child, parent));
                    creates.push(child);
                }
            }
            NestedOp::Connect(criteria) => {
                try_outcome!(connect(cx, coord, rel, parent, criteria).await);
            }
            NestedOp::ConnectOrCreate(entries) => {
                let groups: Vec<Criteria> =
                    entries.iter().map(|e| e.matching.clone()).collect();
                let candidates =
                    try_outcome!(fetch_candidates(cx, coord, &rel.related_table, &groups).await);
                let mut hits: Vec<Criteria> = Vec::new();
                for entry in entries {
                    if candidates.iter().any(|row| entry.matching.matches_row(row)) {
                        hits.push(entry.matching.clone());
                    } else {
                        let mut child = entry.create.clone();
                        try_result!(patch_child_keys(rel, &mut child, parent));
                        creates.push(child);
                    }
                }
                if !hits.is_empty() {
                    try_outcome!(point_at_parent(cx, coord, rel, parent, &hits).await);
                }
            }
            other => {
                debug_assert!(false, "unexpected op '{}' in has_many create", other.name());
            }
        }
    }

    try_outcome!(insert_plain(cx, coord, &rel.related_table, creates).await);
    Outcome::Ok(())
}

/// Update path. `parents` are the rows the primary statement touched; ops
/// needing a single known parent are only reachable with one of them.
#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name, op = op.name()))]
pub(crate) async fn after_update<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    op: &NestedOp,
    parents: &[Row],
) -> Outcome<(), Error> {
    match op {
        NestedOp::Create(records) => {
            let parent = try_result!(single_parent(rel, parents));
            let mut creates = Vec::with_capacity(records.len());
            for record in records {
                let mut child = record.clone();
                try_result!(patch_child_keys(rel, &mut child, parent));
                creates.push(child);
            }
            try_outcome!(insert_plain(cx, coord, &rel.related_table, creates).await);
            Outcome::Ok(())
        }
        NestedOp::Connect(criteria) => {
            let parent = try_result!(single_parent(rel, parents));
            connect(cx, coord, rel, parent, criteria).await
        }
        NestedOp::ConnectOrCreate(entries) => {
            let parent = try_result!(single_parent(rel, parents));
            let groups: Vec<Criteria> = entries.iter().map(|e| e.matching.clone()).collect();
            let candidates =
                try_outcome!(fetch_candidates(cx, coord, &rel.related_table, &groups).await);
            let mut hits = Vec::new();
            let mut creates = Vec::new();
            for entry in entries {
                if candidates.iter().any(|row| entry.matching.matches_row(row)) {
                    hits.push(entry.matching.clone());
                } else {
                    let mut child = entry.create.clone();
                    try_result!(patch_child_keys(rel, &mut child, parent));
                    creates.push(child);
                }
            }
            if !hits.is_empty() {
                try_outcome!(point_at_parent(cx, coord, rel, parent, &hits).await);
            }
            try_outcome!(insert_plain(cx, coord, &rel.related_table, creates).await);
            Outcome::Ok(())
        }
        NestedOp::Set(criteria) => {
            // Detach the current children first, then attach the new set,
            // so the full replacement is visible as exactly two updates.
            let parent = try_result!(single_parent(rel, parents));
            try_outcome!(detach(cx, coord, rel, std::slice::from_ref(parent), None).await);
            if !criteria.is_empty() {
                try_outcome!(connect(cx, coord, rel, parent, criteria).await);
            }
            Outcome::Ok(())
        }
        NestedOp::Disconnect(target) => {
            let narrowing = match target {
                TargetSet::All => None,
                TargetSet::Matching(groups) => or_criteria_expr(None, groups),
            };
            detach(cx, coord, rel, parents, narrowing).await
        }
        NestedOp::Delete(target) => {
            let mut expr = try_result!(parent_scope_expr(rel, parents));
            if let TargetSet::Matching(groups) = target {
                if let Some(narrow) = or_criteria_expr(None, groups) {
                    expr = expr.paren().and(narrow.paren());
                }
            }
            let (sql, params) = DeleteQuery::new(&rel.related_table)
                .filter(Where::new(expr))
                .build_with_dialect(coord.dialect());
            let deleted = try_outcome!(coord.execute(cx, &sql, &params).await);
            tracing::debug!(table = %rel.related_table, deleted, "deleted attached rows");
            Outcome::Ok(())
        }
        NestedOp::Update(items) => {
            for item in items {
                let mut expr = try_result!(parent_scope_expr(rel, parents));
                if let Some(narrow) = item.matching.as_ref().and_then(|m| m.to_expr(None)) {
                    expr = expr.paren().and(narrow.paren());
                }
                let mut update = UpdateQuery::new(&rel.related_table);
                for (column, value) in item.data.entries() {
                    update = update.set(column.clone(), value.clone());
                }
                let (sql, params) =
                    update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
                try_outcome!(coord.execute(cx, &sql, &params).await);
            }
            Outcome::Ok(())
        }
        other => {
            debug_assert!(false, "unexpected op '{}' in has_many update", other.name());
            Outcome::Ok(())
        }
    }
}

/// Point existing rows at `parent`. Every criteria group must match at
/// least one candidate row; a miss aborts before any foreign key moves.
async fn connect<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    parent: &Row,
    criteria: &[Criteria],
) -> Outcome<(), Error> {
    if criteria.is_empty() {
        return Outcome::Ok(());
    }
    let candidates =
        try_outcome!(fetch_candidates(cx, coord, &rel.related_table, criteria).await);
    for group in criteria {
        if !candidates.iter().any(|row| group.matches_row(row)) {
            return Outcome::Err(Error::NotFound(NotFoundError {
                table: rel.related_table.clone(),
                message: describe_criteria(group),
            }));
        }
    }
    try_outcome!(point_at_parent(cx, coord, rel, parent, criteria).await);
    Outcome::Ok(())
}

async fn point_at_parent<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    parent: &Row,
    criteria: &[Criteria],
) -> Outcome<u64, Error> {
    let Some(expr) = or_criteria_expr(None, criteria) else {
        return Outcome::Ok(0);
    };
    let mut update = UpdateQuery::new(&rel.related_table);
    for pair in &rel.key_pairs {
        let value = try_result!(parent.require(&pair.owner)).clone();
        update = update.set(pair.related.clone(), value);
    }
    let (sql, params) = update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
    coord.execute(cx, &sql, &params).await
}

/// Null out the foreign keys of attached rows. Never deletes.
async fn detach<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    parents: &[Row],
    narrowing: Option<Expr>,
) -> Outcome<(), Error> {
    let mut expr = try_result!(parent_scope_expr(rel, parents));
    if let Some(narrow) = narrowing {
        expr = expr.paren().and(narrow.paren());
    }
    let mut update = UpdateQuery::new(&rel.related_table);
    for pair in &rel.key_pairs {
        update = update.set(pair.related.clone(), Value::Null);
    }
    let (sql, params) = update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
    let detached = try_outcome!(coord.execute(cx, &sql, &params).await);
    tracing::debug!(table = %rel.related_table, detached, "cleared foreign keys");
    Outcome::Ok(())
}

fn single_parent<'a>(
    rel: &ResolvedRelation,
    parents: &'a [Row],
) -> relmodel_core::Result<&'a Row> {
    match parents {
        [parent] => Ok(parent),
        _ => Err(Error::MultipleRecords(relmodel_core::MultipleRecordsError {
            table: rel.table.clone(),
            matched: parents.len() as u64,
        })),
    }
}
