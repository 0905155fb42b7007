//! Dialect-aware SELECT builder.

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::expr::Expr;
use relmodel_core::{Dialect, Value};

/// Non-generic SELECT representation.
///
/// SQL generation is deferred until a specific dialect is known. The
/// same description doubles as an EXISTS subquery via
/// [`build_exists_with_dialect`](SelectQuery::build_exists_with_dialect),
/// which is how relation chains compose without alias bookkeeping.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    /// Table name for FROM clause
    pub table: String,
    /// Columns to select (empty = all)
    pub columns: Vec<String>,
    /// WHERE clause conditions
    pub where_clause: Option<Where>,
    /// ORDER BY clauses
    pub order_by: Vec<OrderBy>,
    /// LIMIT clause
    pub limit: Option<Limit>,
    /// OFFSET clause
    pub offset: Option<Offset>,
    /// DISTINCT flag
    pub distinct: bool,
    /// FOR UPDATE flag
    pub for_update: bool,
}

impl SelectQuery {
    /// Create a query selecting all columns from a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            for_update: false,
        }
    }

    /// Restrict the selected columns.
    #[must_use]
    pub fn columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// AND a condition onto the WHERE clause.
    #[must_use]
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(w) => w.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Require an EXISTS match against a subquery.
    #[must_use]
    pub fn where_exists(self, sub: SelectQuery) -> Self {
        self.and_where(Expr::exists(sub))
    }

    /// Require a NOT EXISTS match against a subquery.
    #[must_use]
    pub fn where_not_exists(self, sub: SelectQuery) -> Self {
        self.and_where(Expr::not_exists(sub))
    }

    /// Append an ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the LIMIT.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    /// Set the OFFSET.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Lock selected rows with FOR UPDATE.
    #[must_use]
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// Build the SQL query and parameters with a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<_> = self
                .columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote_identifier(&self.table));

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, params.len());
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_strs: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(&order_strs.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        if self.for_update {
            sql.push_str(" FOR UPDATE");
        }

        (sql, params)
    }

    /// Build an optimized EXISTS subquery (SELECT 1 instead of SELECT *).
    ///
    /// `offset` is the number of parameters already bound by the outer
    /// statement so placeholder numbering continues correctly.
    /// ORDER BY, LIMIT, and OFFSET are omitted as they have no effect
    /// inside EXISTS.
    pub fn build_exists_with_dialect(
        &self,
        dialect: Dialect,
        offset: usize,
    ) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        sql.push_str("SELECT 1 FROM ");
        sql.push_str(&dialect.quote_identifier(&self.table));

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, offset);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all() {
        let (sql, params) = SelectQuery::new("users").build_with_dialect(Dialect::Postgres);
        assert_eq!(sql, "SELECT * FROM \"users\"");
        assert!(params.is_empty());
    }

    #[test]
    fn select_with_where_and_order() {
        let q = SelectQuery::new("users")
            .columns(["id", "name"])
            .and_where(Expr::col("active").eq(Expr::lit(true)))
            .order_by(OrderBy::desc("id"))
            .limit(10);
        let (sql, params) = q.build_with_dialect(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"active\" = $1 ORDER BY \"id\" DESC LIMIT 10"
        );
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn nested_exists_numbering() {
        let inner = SelectQuery::new("teams")
            .and_where(Expr::qualified("teams", "id").eq(Expr::lit(9i64)));
        let mid = SelectQuery::new("memberships")
            .and_where(
                Expr::qualified("memberships", "user_id").eq(Expr::qualified("users", "id")),
            )
            .where_exists(inner);
        let outer = SelectQuery::new("users")
            .and_where(Expr::col("active").eq(Expr::lit(true)))
            .where_exists(mid);

        let (sql, params) = outer.build_with_dialect(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE \"active\" = $1 AND EXISTS (SELECT 1 FROM \"memberships\" WHERE \"memberships\".\"user_id\" = \"users\".\"id\" AND EXISTS (SELECT 1 FROM \"teams\" WHERE \"teams\".\"id\" = $2))"
        );
        assert_eq!(params, vec![Value::Bool(true), Value::Int(9)]);
    }

    #[test]
    fn exists_drops_ordering() {
        let q = SelectQuery::new("posts")
            .and_where(Expr::col("published").eq(Expr::lit(true)))
            .order_by(OrderBy::asc("id"))
            .limit(5);
        let (sql, _) = q.build_exists_with_dialect(Dialect::Postgres, 0);
        assert_eq!(
            sql,
            "SELECT 1 FROM \"posts\" WHERE \"published\" = $1"
        );
    }

    #[test]
    fn sqlite_placeholders() {
        let q = SelectQuery::new("users").and_where(Expr::col("id").eq(Expr::lit(1i64)));
        let (sql, _) = q.build_with_dialect(Dialect::Sqlite);
        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"id\" = ?1");
    }
}
