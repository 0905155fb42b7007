//! INSERT, UPDATE, and DELETE statement builders.
//!
//! Write statements are built as data and rendered per dialect, like
//! [`SelectQuery`](crate::select::SelectQuery). INSERT supports
//! multi-row VALUES lists so batched nested creates go out as a single
//! statement.

use crate::clause::Where;
use relmodel_core::{Dialect, Value};

/// A multi-row INSERT statement.
#[derive(Debug, Clone)]
pub struct InsertQuery {
    /// Target table
    pub table: String,
    /// Column names, shared by every row
    pub columns: Vec<String>,
    /// Value rows; each must match `columns` in length
    pub rows: Vec<Vec<Value>>,
    /// RETURNING column names (empty = no RETURNING clause)
    pub returning: Vec<String>,
}

impl InsertQuery {
    /// Create an INSERT for the given table and column set.
    pub fn new(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Append a value row. Arity must match the column set.
    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(values);
        self
    }

    /// Request RETURNING of the given columns.
    #[must_use]
    pub fn returning(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Request RETURNING of all columns.
    #[must_use]
    pub fn returning_all(mut self) -> Self {
        self.returning = vec!["*".to_string()];
        self
    }

    /// Build the SQL statement and parameters.
    ///
    /// `Value::Default` renders as the DEFAULT keyword rather than a
    /// bound parameter.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        if self.columns.is_empty() {
            // All-defaults row; only meaningful for a single row.
            debug_assert!(self.rows.len() <= 1);
            let mut sql = format!(
                "INSERT INTO {} DEFAULT VALUES",
                dialect.quote_identifier(&self.table)
            );
            push_returning(&mut sql, &self.returning, dialect);
            return (sql, Vec::new());
        }

        let mut params = Vec::new();
        let cols: Vec<_> = self
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            dialect.quote_identifier(&self.table),
            cols.join(", ")
        );

        let mut tuples = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut slots = Vec::with_capacity(row.len());
            for value in row {
                if matches!(value, Value::Default) {
                    slots.push("DEFAULT".to_string());
                } else {
                    params.push(value.clone());
                    slots.push(dialect.placeholder(params.len()));
                }
            }
            tuples.push(format!("({})", slots.join(", ")));
        }
        sql.push_str(&tuples.join(", "));

        push_returning(&mut sql, &self.returning, dialect);
        (sql, params)
    }
}

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    /// Target table
    pub table: String,
    /// SET assignments in order
    pub assignments: Vec<(String, Value)>,
    /// WHERE clause (None updates every row)
    pub where_clause: Option<Where>,
    /// RETURNING column names (empty = no RETURNING clause)
    pub returning: Vec<String>,
}

impl UpdateQuery {
    /// Create an UPDATE for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            where_clause: None,
            returning: Vec::new(),
        }
    }

    /// Add a SET assignment.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    /// Restrict the rows to update.
    #[must_use]
    pub fn filter(mut self, where_clause: Where) -> Self {
        self.where_clause = Some(where_clause);
        self
    }

    /// Request RETURNING of the given columns.
    #[must_use]
    pub fn returning(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Build the SQL statement and parameters.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("UPDATE {} SET ", dialect.quote_identifier(&self.table));

        let mut sets = Vec::with_capacity(self.assignments.len());
        for (column, value) in &self.assignments {
            if matches!(value, Value::Default) {
                sets.push(format!("{} = DEFAULT", dialect.quote_identifier(column)));
            } else {
                params.push(value.clone());
                sets.push(format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.placeholder(params.len())
                ));
            }
        }
        sql.push_str(&sets.join(", "));

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, params.len());
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        push_returning(&mut sql, &self.returning, dialect);
        (sql, params)
    }
}

/// A DELETE statement.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    /// Target table
    pub table: String,
    /// WHERE clause (None deletes every row)
    pub where_clause: Option<Where>,
}

impl DeleteQuery {
    /// Create a DELETE for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Restrict the rows to delete.
    #[must_use]
    pub fn filter(mut self, where_clause: Where) -> Self {
        self.where_clause = Some(where_clause);
        self
    }

    /// Build the SQL statement and parameters.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        (sql, params)
    }
}

fn push_returning(sql: &mut String, returning: &[String], dialect: Dialect) {
    if returning.is_empty() {
        return;
    }
    sql.push_str(" RETURNING ");
    let cols: Vec<_> = returning
        .iter()
        .map(|c| {
            if c == "*" {
                c.clone()
            } else {
                dialect.quote_identifier(c)
            }
        })
        .collect();
    sql.push_str(&cols.join(", "));
}
