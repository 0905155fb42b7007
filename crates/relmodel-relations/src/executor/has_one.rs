//! `has_one` execution.
//!
//! Same key layout as `has_many`, with one extra discipline: before a new
//! row is attached, the current holder (if any) is detached first, so at
//! no point do two rows carry the same parent's foreign key.

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Error, NotFoundError, Row, Value};
use relmodel_query::{DeleteQuery, SelectQuery, UpdateQuery, Where};

use crate::coordinator::Coordinator;
use crate::descriptor::ResolvedRelation;
use crate::payload::{Criteria, NestedOp, Record};
use crate::{try_outcome, try_result};

use super::{
    describe_criteria, fetch_candidates, insert_plain, parent_scope_expr, patch_child_keys,
};

/// Create path: the parent is new, so there is no previous holder to
/// displace.
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
                if let Some(record) = records.first() {
                    let mut child = record.clone();
                    try_result!(patch_child_keys(rel, &mut child, parent));
                    creates.push(child);
                }
            }
            NestedOp::Connect(criteria) => {
                if let Some(criteria) = criteria.first() {
                    try_outcome!(attach(cx, coord, rel, parent, criteria, true).await);
                }
            }
            NestedOp::ConnectOrCreate(entries) => {
                if let Some(entry) = entries.first() {
                    let found = try_outcome!(
                        attach(cx, coord, rel, parent, &entry.matching, false).await
                    );
                    if !found {
                        let mut child = entry.create.clone();
                        try_result!(patch_child_keys(rel, &mut child, parent));
                        creates.push(child);
                    }
                }
            }
            other => {
                debug_assert!(false, "unexpected op '{}' in has_one create", other.name());
            }
        }
    }

    try_outcome!(insert_plain(cx, coord, &rel.related_table, creates).await);
    Outcome::Ok(())
}

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
            let Some(record) = records.first() else {
                return Outcome::Ok(());
            };
            try_outcome!(displace(cx, coord, rel, parent).await);
            let mut child = record.clone();
            try_result!(patch_child_keys(rel, &mut child, parent));
            try_outcome!(insert_plain(cx, coord, &rel.related_table, vec![child]).await);
            Outcome::Ok(())
        }
        NestedOp::Connect(criteria) | NestedOp::Set(criteria) => {
            let parent = try_result!(single_parent(rel, parents));
            let Some(criteria) = criteria.first() else {
                // empty set payload: just clear the current holder
                try_outcome!(displace(cx, coord, rel, parent).await);
                return Outcome::Ok(());
            };
            try_outcome!(displace(cx, coord, rel, parent).await);
            try_outcome!(attach(cx, coord, rel, parent, criteria, true).await);
            Outcome::Ok(())
        }
        NestedOp::ConnectOrCreate(entries) => {
            let parent = try_result!(single_parent(rel, parents));
            let Some(entry) = entries.first() else {
                return Outcome::Ok(());
            };
            try_outcome!(displace(cx, coord, rel, parent).await);
            let found =
                try_outcome!(attach(cx, coord, rel, parent, &entry.matching, false).await);
            if !found {
                let mut child = entry.create.clone();
                try_result!(patch_child_keys(rel, &mut child, parent));
                try_outcome!(insert_plain(cx, coord, &rel.related_table, vec![child]).await);
            }
            Outcome::Ok(())
        }
        NestedOp::Disconnect(_) => {
            for parent in parents {
                try_outcome!(displace(cx, coord, rel, parent).await);
            }
            Outcome::Ok(())
        }
        NestedOp::Delete(_) => {
            let expr = try_result!(parent_scope_expr(rel, parents));
            let (sql, params) = DeleteQuery::new(&rel.related_table)
                .filter(Where::new(expr))
                .build_with_dialect(coord.dialect());
            try_outcome!(coord.execute(cx, &sql, &params).await);
            Outcome::Ok(())
        }
        NestedOp::Update(items) => {
            let Some(item) = items.first() else {
                return Outcome::Ok(());
            };
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
            Outcome::Ok(())
        }
        NestedOp::Upsert { update, create } => {
            let parent = try_result!(single_parent(rel, parents));
            let expr = try_result!(parent_scope_expr(rel, std::slice::from_ref(parent)));
            let probe = SelectQuery::new(&rel.related_table).and_where(expr.clone()).limit(1);
            let (sql, params) = probe.build_with_dialect(coord.dialect());
            let existing = try_outcome!(coord.query_one(cx, &sql, &params).await);
            if existing.is_some() {
                let mut query = UpdateQuery::new(&rel.related_table);
                for (column, value) in update.entries() {
                    query = query.set(column.clone(), value.clone());
                }
                let (sql, params) =
                    query.filter(Where::new(expr)).build_with_dialect(coord.dialect());
                try_outcome!(coord.execute(cx, &sql, &params).await);
            } else {
                let mut child = create.clone();
                try_result!(patch_child_keys(rel, &mut child, parent));
                try_outcome!(insert_plain(cx, coord, &rel.related_table, vec![child]).await);
            }
            Outcome::Ok(())
        }
    }
}

/// Point the row matched by `criteria` at `parent`. With `must_exist`, a
/// miss is an error; otherwise the caller gets `false` back.
async fn attach<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    parent: &Row,
    criteria: &Criteria,
    must_exist: bool,
) -> Outcome<bool, Error> {
    if !must_exist {
        // connect-or-create probes first so a miss can fall through to the
        // create branch without touching anything
        let candidates = try_outcome!(
            fetch_candidates(cx, coord, &rel.related_table, std::slice::from_ref(criteria)).await
        );
        if !candidates.iter().any(|row| criteria.matches_row(row)) {
            return Outcome::Ok(false);
        }
    }
    let Some(expr) = criteria.to_expr(None) else {
        return Outcome::Ok(false);
    };
    let mut update = UpdateQuery::new(&rel.related_table);
    for pair in &rel.key_pairs {
        let value = try_result!(parent.require(&pair.owner)).clone();
        update = update.set(pair.related.clone(), value);
    }
    let (sql, params) = update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
    let affected = try_outcome!(coord.execute(cx, &sql, &params).await);
    if must_exist && affected == 0 {
        return Outcome::Err(Error::NotFound(NotFoundError {
            table: rel.related_table.clone(),
            message: describe_criteria(criteria),
        }));
    }
    Outcome::Ok(affected > 0)
}

/// Clear the current holder's foreign key, if any.
async fn displace<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    rel: &ResolvedRelation,
    parent: &Row,
) -> Outcome<(), Error> {
    let expr = try_result!(parent_scope_expr(rel, std::slice::from_ref(parent)));
    let mut update = UpdateQuery::new(&rel.related_table);
    for pair in &rel.key_pairs {
        update = update.set(pair.related.clone(), Value::Null);
    }
    let (sql, params) = update.filter(Where::new(expr)).build_with_dialect(coord.dialect());
    try_outcome!(coord.execute(cx, &sql, &params).await);
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
