//! Join predicate construction.
//!
//! Three building blocks cover everything the executor and the query
//! surface need:
//!
//! - [`related_query`]: the related rows of one concrete owner row
//! - [`chain_query`]: the related rows reachable from *any* row of a base
//!   query, nesting the base as an `EXISTS` condition so relation chains
//!   (`a.b.c`) compose to arbitrary depth
//! - [`reverse_join`]: the inverse predicate, restricting owner rows to
//!   those with at least one related row matching a filter

use relmodel_core::{Error, NotFoundError, Result, Row};
use relmodel_query::{Expr, SelectQuery};

use crate::descriptor::ResolvedRelation;
use crate::payload::Criteria;

/// Equality conditions locating the related rows of one owner row, for
/// relations whose keys pair columns directly. The resulting criteria are
/// in terms of the related table's columns.
pub fn scope_criteria(rel: &ResolvedRelation, owner: &Row) -> Result<Criteria> {
    let mut criteria = Criteria::new();
    for pair in &rel.key_pairs {
        let value = owner.require(&pair.owner)?.clone();
        criteria = criteria.eq(pair.related.clone(), value);
    }
    Ok(criteria)
}

/// Correlated column-equality predicate tying the related table to the
/// owning table. Both sides are rendered qualified, so the predicate works
/// inside an `EXISTS` over either table.
pub fn join_predicate(rel: &ResolvedRelation) -> Expr {
    let mut out: Option<Expr> = None;
    for pair in &rel.key_pairs {
        let cond = Expr::qualified(&rel.related_table, &pair.related)
            .eq(Expr::qualified(&rel.table, &pair.owner));
        out = Some(match out {
            Some(prev) => prev.and(cond),
            None => cond,
        });
    }
    out.unwrap_or_else(|| Expr::raw("1 = 1"))
}

/// Query selecting the related rows of one owner row. Works for every
/// relation kind; derived relations walk their hop chain.
pub fn related_query(rel: &ResolvedRelation, owner: &Row) -> Result<SelectQuery> {
    if rel.is_through() {
        let mut hops = rel.hops.iter();
        let first = hops.next().ok_or_else(|| {
            Error::NotFound(NotFoundError {
                table: rel.related_table.clone(),
                message: format!("derived relation '{}' has no hops", rel.name),
            })
        })?;
        let mut query = related_query(first, owner)?;
        for hop in hops {
            query = chain_query(hop, query);
        }
        return Ok(query);
    }

    if let Some(join) = &rel.join {
        // related rows linked to this owner through the join table
        let owner_key = owner.require(&join.primary_key)?.clone();
        let link = SelectQuery::new(&join.join_table)
            .and_where(
                Expr::qualified(&join.join_table, &join.association_foreign_key)
                    .eq(Expr::qualified(&rel.related_table, &join.association_primary_key)),
            )
            .and_where(
                Expr::qualified(&join.join_table, &join.foreign_key).eq(Expr::lit(owner_key)),
            );
        return Ok(SelectQuery::new(&rel.related_table).where_exists(link));
    }

    let criteria = scope_criteria(rel, owner)?;
    let mut query = SelectQuery::new(&rel.related_table);
    if let Some(expr) = criteria.to_expr(Some(&rel.related_table)) {
        query = query.and_where(expr);
    }
    Ok(query)
}

/// Lift a query over the owning table into a query over the related table:
/// all related rows reachable from any row `base` matches. The base query
/// is nested as an `EXISTS` condition rather than joined, which keeps
/// chained relation accesses composable.
pub fn chain_query(rel: &ResolvedRelation, base: SelectQuery) -> SelectQuery {
    if rel.is_through() {
        let mut query = base;
        for hop in &rel.hops {
            query = chain_query(hop, query);
        }
        return query;
    }

    if let Some(join) = &rel.join {
        let owner_link = base.and_where(
            Expr::qualified(&rel.table, &join.primary_key)
                .eq(Expr::qualified(&join.join_table, &join.foreign_key)),
        );
        let link = SelectQuery::new(&join.join_table)
            .and_where(
                Expr::qualified(&join.join_table, &join.association_foreign_key)
                    .eq(Expr::qualified(&rel.related_table, &join.association_primary_key)),
            )
            .where_exists(owner_link);
        return SelectQuery::new(&rel.related_table).where_exists(link);
    }

    let inner = base.and_where(join_predicate(rel));
    SelectQuery::new(&rel.related_table).where_exists(inner)
}

/// Inverse predicate: an expression on the owning table that holds when at
/// least one related row matches `related`. `related` must be a query over
/// the relation's related table.
pub fn reverse_join(rel: &ResolvedRelation, related: SelectQuery) -> Expr {
    if rel.is_through() {
        // Collapse the chain from the far end back toward the owner; each
        // step wraps the accumulated filter as an EXISTS on the next table
        // inward, and the first hop produces the final owner-side predicate.
        let mut query = related;
        for hop in rel.hops.iter().skip(1).rev() {
            let pred = reverse_join(hop, query);
            query = SelectQuery::new(&hop.table).and_where(pred);
        }
        return reverse_join(&rel.hops[0], query);
    }

    if let Some(join) = &rel.join {
        let link = SelectQuery::new(&join.join_table)
            .and_where(
                Expr::qualified(&join.join_table, &join.association_foreign_key)
                    .eq(Expr::qualified(&rel.related_table, &join.association_primary_key)),
            )
            .and_where(
                Expr::qualified(&join.join_table, &join.foreign_key)
                    .eq(Expr::qualified(&rel.table, &join.primary_key)),
            );
        return Expr::exists(related.where_exists(link));
    }

    Expr::exists(related.and_where(join_predicate(rel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{JoinTableKeys, KeyPair, RelationKind};
    use relmodel_core::{Dialect, Value};
    use std::sync::Arc;

    fn has_many_posts() -> ResolvedRelation {
        ResolvedRelation {
            table: "users".to_string(),
            name: "posts".to_string(),
            kind: RelationKind::HasMany,
            related_table: "posts".to_string(),
            key_pairs: vec![KeyPair {
                owner: "id".to_string(),
                related: "author_id".to_string(),
            }],
            join: None,
            hops: Vec::new(),
            required: false,
        }
    }

    fn habtm_tags() -> ResolvedRelation {
        ResolvedRelation {
            table: "posts".to_string(),
            name: "tags".to_string(),
            kind: RelationKind::HasAndBelongsToMany,
            related_table: "tags".to_string(),
            key_pairs: Vec::new(),
            join: Some(
                JoinTableKeys::new("posts_tags")
                    .foreign_key("post_id")
                    .association_foreign_key("tag_id"),
            ),
            hops: Vec::new(),
            required: false,
        }
    }

    fn owner_row() -> Row {
        Row::new(vec!["id".to_string()], vec![Value::Int(7)])
    }

    #[test]
    fn related_query_for_direct_keys() {
        let rel = has_many_posts();
        let q = related_query(&rel, &owner_row()).unwrap();
        let (sql, params) = q.build_with_dialect(Dialect::Postgres);
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE \"posts\".\"author_id\" = $1");
        assert_eq!(params, vec![Value::Int(7)]);
    }

    #[test]
    fn related_query_through_join_table() {
        let rel = habtm_tags();
        let row = owner_row();
        let q = related_query(&rel, &row).unwrap();
        let (sql, params) = q.build_with_dialect(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT * FROM \"tags\" WHERE EXISTS (SELECT 1 FROM \"posts_tags\" \
             WHERE \"posts_tags\".\"tag_id\" = \"tags\".\"id\" \
             AND \"posts_tags\".\"post_id\" = $1)"
        );
        assert_eq!(params, vec![Value::Int(7)]);
    }

    #[test]
    fn chain_nests_base_as_exists() {
        let rel = has_many_posts();
        let base = SelectQuery::new("users").and_where(Expr::col("active").eq(Expr::lit(true)));
        let q = chain_query(&rel, base);
        let (sql, params) = q.build_with_dialect(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" WHERE EXISTS (SELECT 1 FROM \"users\" \
             WHERE \"active\" = $1 \
             AND \"posts\".\"author_id\" = \"users\".\"id\")"
        );
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn chain_composes_over_a_derived_relation() {
        // users -> posts -> tags, flattened as a two-hop chain
        let through = ResolvedRelation {
            table: "users".to_string(),
            name: "post_tags".to_string(),
            kind: RelationKind::HasMany,
            related_table: "tags".to_string(),
            key_pairs: Vec::new(),
            join: None,
            hops: vec![Arc::new(has_many_posts()), Arc::new(habtm_tags())],
            required: false,
        };
        let base = SelectQuery::new("users").and_where(Expr::col("id").eq(Expr::lit(7)));
        let q = chain_query(&through, base);
        let (sql, params) = q.build_with_dialect(Dialect::Postgres);
        // outermost query is over the final table, with the chain nested
        assert!(sql.starts_with("SELECT * FROM \"tags\" WHERE EXISTS (SELECT 1 FROM \"posts_tags\""));
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"posts\""));
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"users\""));
        assert_eq!(params, vec![Value::Int(7)]);
    }

    #[test]
    fn reverse_join_restricts_owner_rows() {
        let rel = has_many_posts();
        let filter = SelectQuery::new("posts").and_where(Expr::col("published").eq(Expr::lit(true)));
        let pred = reverse_join(&rel, filter);
        let query = SelectQuery::new("users").and_where(pred);
        let (sql, params) = query.build_with_dialect(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE EXISTS (SELECT 1 FROM \"posts\" \
             WHERE \"published\" = $1 \
             AND \"posts\".\"author_id\" = \"users\".\"id\")"
        );
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn reverse_join_through_join_table() {
        let rel = habtm_tags();
        let filter = SelectQuery::new("tags").and_where(Expr::col("name").eq(Expr::lit("rust")));
        let pred = reverse_join(&rel, filter);
        let query = SelectQuery::new("posts").and_where(pred);
        let (sql, _) = query.build_with_dialect(Dialect::Postgres);
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"tags\""));
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"posts_tags\""));
        assert!(sql.contains("\"posts_tags\".\"post_id\" = \"posts\".\"id\""));
    }
}
