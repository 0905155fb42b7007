//! Nested mutation execution, one module per relation kind.
//!
//! Shared batching helpers live here. Sub-operations of the same variant
//! across a call are grouped: candidate lookups go out as a single SELECT
//! with OR-combined predicates, and created records sharing a column set
//! go out as one multi-row INSERT.

use asupersync::{Cx, Outcome};
use relmodel_core::{Error, NotFoundError, Result, Row, Value};
use relmodel_query::{Expr, InsertQuery, SelectQuery};

use crate::coordinator::Coordinator;
use crate::descriptor::ResolvedRelation;
use crate::payload::{Criteria, Record};
use crate::{try_outcome, try_result};

pub(crate) mod belongs_to;
pub(crate) mod has_many;
pub(crate) mod has_one;
pub(crate) mod many_to_many;

use relmodel_core::Connection;

/// OR-combine criteria groups into one predicate. Empty groups match
/// everything and short-circuit the whole predicate away.
pub(crate) fn or_criteria_expr(table: Option<&str>, groups: &[Criteria]) -> Option<Expr> {
    let mut out: Option<Expr> = None;
    for group in groups {
        let Some(expr) = group.to_expr(table) else {
            return None;
        };
        let expr = if groups.len() > 1 { expr.paren() } else { expr };
        out = Some(match out {
            Some(prev) => prev.or(expr),
            None => expr,
        });
    }
    out
}

/// One SELECT for all candidate lookups of a call. Callers match rows back
/// to their criteria with [`Criteria::matches_row`].
pub(crate) async fn fetch_candidates<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    table: &str,
    groups: &[Criteria],
) -> Outcome<Vec<Row>, Error> {
    if groups.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    let mut query = SelectQuery::new(table);
    if let Some(expr) = or_criteria_expr(None, groups) {
        query = query.and_where(expr);
    }
    let (sql, params) = query.build_with_dialect(coord.dialect());
    coord.query(cx, &sql, &params).await
}

/// Human-readable criteria summary for NotFound messages.
pub(crate) fn describe_criteria(criteria: &Criteria) -> String {
    let cols: Vec<&str> = criteria.entries().iter().map(|(c, _)| c.as_str()).collect();
    format!("matched by {}", cols.join(", "))
}

fn require_returning(coord: &Coordinator<'_, impl Connection>) -> Result<()> {
    if coord.dialect().supports_returning() {
        Ok(())
    } else {
        Err(Error::Custom(
            "nested mutations need inserted rows back; this driver has no RETURNING clause"
                .to_string(),
        ))
    }
}

/// Insert tagged records, grouping those with the same column set into one
/// multi-row statement, and hand back the inserted rows under their tags.
pub(crate) async fn insert_returning<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    table: &str,
    records: Vec<(usize, Record)>,
) -> Outcome<Vec<(usize, Row)>, Error> {
    if records.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    try_result!(require_returning(coord));

    let mut out = Vec::with_capacity(records.len());
    for (columns, group) in group_by_columns(records) {
        let mut insert = InsertQuery::new(table, columns.iter().map(String::as_str));
        for (_, record) in &group {
            let values: Vec<Value> = columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            insert = insert.row(values);
        }
        let (sql, params) = insert.returning_all().build_with_dialect(coord.dialect());
        tracing::debug!(table, rows = group.len(), "batched insert");
        let rows = try_outcome!(coord.query(cx, &sql, &params).await);
        if rows.len() != group.len() {
            return Outcome::Err(Error::Custom(format!(
                "insert into '{table}' returned {} rows for {} values",
                rows.len(),
                group.len()
            )));
        }
        for ((tag, _), row) in group.into_iter().zip(rows) {
            out.push((tag, row));
        }
    }
    Outcome::Ok(out)
}

/// Insert one record and hand back the inserted row.
pub(crate) async fn insert_single<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    table: &str,
    record: Record,
) -> Outcome<Row, Error> {
    let created = try_outcome!(insert_returning(cx, coord, table, vec![(0, record)]).await);
    match created.into_iter().next() {
        Some((_, row)) => Outcome::Ok(row),
        None => Outcome::Err(Error::Custom(format!(
            "insert into '{table}' returned no rows"
        ))),
    }
}

/// Insert records without reading them back.
pub(crate) async fn insert_plain<C: Connection>(
    cx: &Cx,
    coord: &Coordinator<'_, C>,
    table: &str,
    records: Vec<Record>,
) -> Outcome<u64, Error> {
    if records.is_empty() {
        return Outcome::Ok(0);
    }
    let tagged: Vec<(usize, Record)> = records.into_iter().enumerate().collect();
    let mut affected = 0;
    for (columns, group) in group_by_columns(tagged) {
        let mut insert = InsertQuery::new(table, columns.iter().map(String::as_str));
        for (_, record) in &group {
            let values: Vec<Value> = columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            insert = insert.row(values);
        }
        let (sql, params) = insert.build_with_dialect(coord.dialect());
        tracing::debug!(table, rows = group.len(), "batched insert");
        affected += try_outcome!(coord.execute(cx, &sql, &params).await);
    }
    Outcome::Ok(affected)
}

/// Group records by their sorted column signature, preserving the order
/// records appear within each group.
fn group_by_columns(records: Vec<(usize, Record)>) -> Vec<(Vec<String>, Vec<(usize, Record)>)> {
    let mut groups: Vec<(Vec<String>, Vec<(usize, Record)>)> = Vec::new();
    for (tag, record) in records {
        let signature = record.column_signature();
        if let Some((_, group)) = groups.iter_mut().find(|(sig, _)| *sig == signature) {
            group.push((tag, record));
        } else {
            groups.push((signature, vec![(tag, record)]));
        }
    }
    groups
}

/// Copy the parent-side key values into a child record, i.e. set the
/// foreign key columns a `has_one`/`has_many` child carries.
pub(crate) fn patch_child_keys(
    rel: &ResolvedRelation,
    record: &mut Record,
    parent: &Row,
) -> Result<()> {
    for pair in &rel.key_pairs {
        record.insert(pair.related.clone(), parent.require(&pair.owner)?.clone());
    }
    Ok(())
}

/// Copy the related row's key values into the owning record, i.e. set the
/// foreign key columns a `belongs_to` owner carries.
pub(crate) fn patch_owner_keys(
    rel: &ResolvedRelation,
    record: &mut Record,
    related: &Row,
) -> Result<()> {
    for pair in &rel.key_pairs {
        record.insert(pair.owner.clone(), related.require(&pair.related)?.clone());
    }
    Ok(())
}

/// Predicate over the related table matching rows attached to any of the
/// given parents, for key-pair relations.
pub(crate) fn parent_scope_expr(rel: &ResolvedRelation, parents: &[Row]) -> Result<Expr> {
    let mut groups = Vec::with_capacity(parents.len());
    for parent in parents {
        let mut criteria = Criteria::new();
        for pair in &rel.key_pairs {
            criteria = criteria.eq(pair.related.clone(), parent.require(&pair.owner)?.clone());
        }
        groups.push(criteria);
    }
    or_criteria_expr(None, &groups).ok_or_else(|| {
        Error::NotFound(NotFoundError {
            table: rel.related_table.clone(),
            message: "relation has no key columns".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::Dialect;

    #[test]
    fn or_criteria_parenthesizes_groups() {
        let groups = vec![
            Criteria::new().eq("a", 1).eq("b", 2),
            Criteria::new().eq("a", 3),
        ];
        let expr = or_criteria_expr(None, &groups).unwrap();
        let mut params = Vec::new();
        let sql = expr.build_with_dialect(Dialect::Postgres, &mut params, 0);
        assert_eq!(sql, "(\"a\" = $1 AND \"b\" = $2) OR (\"a\" = $3)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn empty_group_matches_everything() {
        let groups = vec![Criteria::new().eq("a", 1), Criteria::new()];
        assert!(or_criteria_expr(None, &groups).is_none());
    }

    #[test]
    fn grouping_preserves_order_within_groups() {
        let records = vec![
            (0, Record::new().set("a", 1)),
            (1, Record::new().set("b", 2)),
            (2, Record::new().set("a", 3)),
        ];
        let groups = group_by_columns(records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(groups[1].1[0].0, 1);
    }
}
