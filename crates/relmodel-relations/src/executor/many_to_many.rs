//! `has_and_belongs_to_many` execution.
//!
//! Attachment state lives in the join table: connect/disconnect insert and
//! delete link rows, `delete` additionally removes the related rows, and
//! `set` replaces the full link set for a parent.

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Error, NotFoundError, Result, Row, Value};
use relmodel_query::{DeleteQuery, Expr, InsertQuery, SelectQuery, UpdateQuery, Where};

use crate::coordinator::Coordinator;
use crate::descriptor::{JoinTableKeys, ResolvedRelation};
use crate::payload::{Criteria, NestedOp, TargetSet};
use crate::{try_outcome, try_result};

use super::{describe_criteria, fetch_candidates, insert_returning};

fn join_keys(rel: &ResolvedRelation) -> Result<&JoinTableKeys> {
    rel.join.as_ref().ok_or_else(|| {
        Error::RelationConfig(relmodel_core::RelationConfigError {
            table: rel.table.clone(),
            relation: rel.name.clone(),
            message: "many-to-many relation has no join table keys".to_string(),
        })
    })
}

fn parent_key(join: &JoinTableKeys, parent: &Row) -> Result<Value> {
    Ok(parent.require(&join.primary_key)?.clone())
}

fn parent_keys(join: &JoinTableKeys, parents: &[Row]) -> Result<Vec<Value>> {
    parents.iter().map(|p| parent_key(join, p)).collect()
}

/// Predicate over the related table: attached to any of the given parents.
fn attached_expr(rel: &ResolvedRelation, join: &JoinTableKeys, keys: Vec<Value>) -> Expr {
    let link = SelectQuery::new(&join.join_table)
        .and_where(
            Expr::qualified(&join.join_table, &join.association_foreign_key)
                .eq(Expr::qualified(&rel.related_table, &join.association_primary_key)),
        )
        .and_where(Expr::col(&join.foreign_key).in_values(keys));
    Expr::exists(link)
}

#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name))]
pub(crate) async fn after_create<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    items: &[(usize, NestedOp)],
    parents: &[Row],
) -> Outcome<(), Error> {
    let join = try_result!(join_keys(rel));
    let mut links: Vec<(Value, Value)> = Vec::new();

    for (idx, op) in items {
        let key = try_result!(parent_key(join, &parents[*idx]));
        match op {
            NestedOp::Connect(criteria) => {
                let found =
                    try_outcome!(resolve_targets(cx, coord, rel, join, criteria, true).await);
                links.extend(found.into_iter().map(|apk| (key.clone(), apk)));
            }
            NestedOp::Create(records) => {
                let tagged = records.iter().cloned().enumerate().collect();
                let created =
                    try_outcome!(insert_returning(cx, coord, &rel.related_table, tagged).await);
                for (_, row) in created {
                    let apk = try_result!(row.require(&join.association_primary_key)).clone();
                    links.push((key.clone(), apk));
                }
            }
            NestedOp::ConnectOrCreate(entries) => {
                let groups: Vec<Criteria> = entries.iter().map(|e| e.matching.clone()).collect();
                let candidates =
                    try_outcome!(fetch_candidates(cx, coord, &rel.related_table, &groups).await);
                let mut creates = Vec::new();
                for (tag, entry) in entries.iter().enumerate() {
                    match candidates.iter().find(|row| entry.matching.matches_row(row)) {
                        Some(row) => {
                            let apk =
                                try_result!(row.require(&join.association_primary_key)).clone();
                            links.push((key.clone(), apk));
                        }
                        None => creates.push((tag, entry.create.clone())),
                    }
                }
                let created =
                    try_outcome!(insert_returning(cx, coord, &rel.related_table, creates).await);
                for (_, row) in created {
                    let apk = try_result!(row.require(&join.association_primary_key)).clone();
                    links.push((key.clone(), apk));
                }
            }
            other => {
                debug_assert!(false, "unexpected op '{}' in many-to-many create", other.name());
            }
        }
    }

    insert_links(cx, coord, join, links).await
}

#[tracing::instrument(level = "debug", skip_all, fields(relation = %rel.name, op = op.name()))]
pub(crate) async fn after_update<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    op: &NestedOp,
    parents: &[Row],
) -> Outcome<(), Error> {
    let join = try_result!(join_keys(rel));
    match op {
        NestedOp::Connect(_) | NestedOp::Create(_) | NestedOp::ConnectOrCreate(_) => {
            let parent = try_result!(single_parent(rel, parents));
            let items = [(0usize, op.clone())];
            after_create(cx, coord, rel, &items, std::slice::from_ref(parent)).await
        }
        NestedOp::Set(criteria) => {
            let parent = try_result!(single_parent(rel, parents));
            let key = try_result!(parent_key(join, parent));
            // Resolve the replacement set up front so a missing target
            // aborts before any link is dropped.
            let targets =
                try_outcome!(resolve_targets(cx, coord, rel, join, criteria, true).await);
            let (sql, params) = DeleteQuery::new(&join.join_table)
                .filter(Where::new(Expr::col(&join.foreign_key).eq(Expr::lit(key.clone()))))
                .build_with_dialect(coord.dialect());
            try_outcome!(coord.execute(cx, &sql, &params).await);
            let links = targets.into_iter().map(|apk| (key.clone(), apk)).collect();
            insert_links(cx, coord, join, links).await
        }
        NestedOp::Disconnect(target) => {
            let keys = try_result!(parent_keys(join, parents));
            let mut expr = Expr::col(&join.foreign_key).in_values(keys);
            if let TargetSet::Matching(groups) = target {
                let apks =
                    try_outcome!(resolve_targets(cx, coord, rel, join, groups, false).await);
                if apks.is_empty() {
                    return Outcome::Ok(());
                }
                expr = expr.and(Expr::col(&join.association_foreign_key).in_values(apks));
            }
            let (sql, params) = DeleteQuery::new(&join.join_table)
                .filter(Where::new(expr))
                .build_with_dialect(coord.dialect());
            let removed = try_outcome!(coord.execute(cx, &sql, &params).await);
            tracing::debug!(join_table = %join.join_table, removed, "removed link rows");
            Outcome::Ok(())
        }
        NestedOp::Delete(target) => {
            let keys = try_result!(parent_keys(join, parents));
            // Attached rows first, narrowed by criteria when given.
            let mut query = SelectQuery::new(&rel.related_table)
                .and_where(attached_expr(rel, join, keys.clone()));
            if let TargetSet::Matching(groups) = target {
                if let Some(narrow) = super::or_criteria_expr(Some(&rel.related_table), groups) {
                    query = query.and_where(narrow);
                }
            }
            let (sql, params) = query.build_with_dialect(coord.dialect());
            let rows = try_outcome!(coord.query(cx, &sql, &params).await);
            if rows.is_empty() {
                return Outcome::Ok(());
            }
            let mut apks = Vec::with_capacity(rows.len());
            for row in &rows {
                apks.push(try_result!(row.require(&join.association_primary_key)).clone());
            }

            let link_expr = Expr::col(&join.foreign_key)
                .in_values(keys)
                .and(Expr::col(&join.association_foreign_key).in_values(apks.clone()));
            let (sql, params) = DeleteQuery::new(&join.join_table)
                .filter(Where::new(link_expr))
                .build_with_dialect(coord.dialect());
            try_outcome!(coord.execute(cx, &sql, &params).await);

            let (sql, params) = DeleteQuery::new(&rel.related_table)
                .filter(Where::new(
                    Expr::col(&join.association_primary_key).in_values(apks),
                ))
                .build_with_dialect(coord.dialect());
            try_outcome!(coord.execute(cx, &sql, &params).await);
            Outcome::Ok(())
        }
        NestedOp::Update(items) => {
            let keys = try_result!(parent_keys(join, parents));
            for item in items {
                let mut expr = attached_expr(rel, join, keys.clone());
                if let Some(narrow) = item.matching.as_ref().and_then(|m| m.to_expr(None)) {
                    expr = expr.and(narrow.paren());
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
            debug_assert!(false, "unexpected op '{}' in many-to-many update", other.name());
            Outcome::Ok(())
        }
    }
}

/// Resolve criteria groups to association key values with one SELECT.
/// With `must_exist`, any group matching nothing is an error.
async fn resolve_targets<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    join: &JoinTableKeys,
    groups: &[Criteria],
    must_exist: bool,
) -> Outcome<Vec<Value>, Error> {
    if groups.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    let candidates = try_outcome!(fetch_candidates(cx, coord, &rel.related_table, groups).await);
    let mut out = Vec::new();
    for criteria in groups {
        let mut matched = false;
        for row in candidates.iter().filter(|row| criteria.matches_row(row)) {
            let apk = try_result!(row.require(&join.association_primary_key)).clone();
            if !out.contains(&apk) {
                out.push(apk);
            }
            matched = true;
        }
        if must_exist && !matched {
            return Outcome::Err(Error::NotFound(NotFoundError {
                table: rel.related_table.clone(),
                message: describe_criteria(criteria),
            }));
        }
    }
    Outcome::Ok(out)
}

/// One multi-row INSERT for all link rows of a call.
async fn insert_links<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    join: &JoinTableKeys,
    links: Vec<(Value, Value)>,
) -> Outcome<(), Error> {
    if links.is_empty() {
        return Outcome::Ok(());
    }
    let mut insert = InsertQuery::new(
        &join.join_table,
        [join.foreign_key.as_str(), join.association_foreign_key.as_str()],
    );
    let count = links.len();
    for (fk, afk) in links {
        insert = insert.row(vec![fk, afk]);
    }
    let (sql, params) = insert.build_with_dialect(coord.dialect());
    try_outcome!(coord.execute(cx, &sql, &params).await);
    tracing::debug!(join_table = %join.join_table, links = count, "inserted link rows");
    Outcome::Ok(())
}

fn single_parent<'a>(rel: &ResolvedRelation, parents: &'a [Row]) -> Result<&'a Row> {
    match parents {
        [parent] => Ok(parent),
        _ => Err(Error::MultipleRecords(relmodel_core::MultipleRecordsError {
            table: rel.table.clone(),
            matched: parents.len() as u64,
        })),
    }
}
