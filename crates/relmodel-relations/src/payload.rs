//! Mutation payloads: sparse records, match criteria, and nested relation
//! operations, plus the rules for which operation is legal where.

use relmodel_core::{BatchNotAllowedError, Error, Result, Row, Value};
use relmodel_query::Expr;
use serde::{Deserialize, Serialize};

use crate::descriptor::{RelationKind, ResolvedRelation};

/// Ordered sparse column/value list. Insertion order is preserved so the
/// rendered SQL is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing any existing value for it.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: String, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = value;
        } else {
            self.entries.push((column, value));
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }

    /// Column names as a sorted signature, used to group records that can
    /// share one multi-row INSERT.
    pub(crate) fn column_signature(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.entries.iter().map(|(c, _)| c.clone()).collect();
        cols.sort();
        cols
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut record = Self::new();
        for (c, v) in iter {
            record.insert(c, v);
        }
        record
    }
}

/// Conjunction of column equality conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    entries: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Render as an expression, qualifying columns with `table` when given.
    /// `Null` values become `IS NULL`. Empty criteria have no expression.
    pub fn to_expr(&self, table: Option<&str>) -> Option<Expr> {
        let mut out: Option<Expr> = None;
        for (column, value) in &self.entries {
            let col = match table {
                Some(t) => Expr::qualified(t, column),
                None => Expr::col(column),
            };
            let cond = if value.is_null() {
                col.is_null()
            } else {
                col.eq(Expr::lit(value.clone()))
            };
            out = Some(match out {
                Some(prev) => prev.and(cond),
                None => cond,
            });
        }
        out
    }

    /// Does `row` satisfy every condition? Missing columns never match.
    pub fn matches_row(&self, row: &Row) -> bool {
        self.entries.iter().all(|(column, value)| {
            row.get_by_name(column).is_some_and(|v| v == value)
        })
    }
}

/// Target selector for `disconnect` and `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetSet {
    /// Every row currently attached to the parent.
    All,
    /// Attached rows additionally matching any of these criteria.
    Matching(Vec<Criteria>),
}

/// `connect_or_create` item: look up by `matching`, insert `create` on a
/// miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOrCreate {
    pub matching: Criteria,
    pub create: Record,
}

/// Nested `update` item. `matching` narrows which attached rows receive
/// the patch; `None` patches all of them (or the single row for to-one
/// relations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedUpdate {
    pub matching: Option<Criteria>,
    pub data: Record,
}

/// A relation operation embedded in a create or update payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NestedOp {
    /// Insert new related rows attached to the parent.
    Create(Vec<Record>),
    /// Attach existing rows located by criteria. Every criteria set must
    /// match at least one row.
    Connect(Vec<Criteria>),
    /// Attach existing rows, inserting those that do not exist yet.
    ConnectOrCreate(Vec<ConnectOrCreate>),
    /// Detach without deleting: clear the foreign key or remove join rows.
    Disconnect(TargetSet),
    /// Replace the full set of attached rows with the ones located by
    /// criteria.
    Set(Vec<Criteria>),
    /// Delete attached rows (and their join rows for many-to-many).
    Delete(TargetSet),
    /// Patch attached rows in place.
    Update(Vec<NestedUpdate>),
    /// Patch the attached row if present, insert otherwise.
    Upsert { update: Record, create: Record },
}

impl NestedOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Connect(_) => "connect",
            Self::ConnectOrCreate(_) => "connect_or_create",
            Self::Disconnect(_) => "disconnect",
            Self::Set(_) => "set",
            Self::Delete(_) => "delete",
            Self::Update(_) => "update",
            Self::Upsert { .. } => "upsert",
        }
    }

    /// Operations with an empty item list are dropped during planning.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::Create(items) => items.is_empty(),
            Self::Connect(items) => items.is_empty(),
            Self::ConnectOrCreate(items) => items.is_empty(),
            Self::Update(items) => items.is_empty(),
            Self::Disconnect(TargetSet::Matching(items)) | Self::Delete(TargetSet::Matching(items)) => {
                items.is_empty()
            }
            _ => false,
        }
    }

    fn item_count(&self) -> usize {
        match self {
            Self::Create(items) => items.len(),
            Self::Connect(items) => items.len(),
            Self::ConnectOrCreate(items) => items.len(),
            Self::Update(items) => items.len(),
            Self::Set(items) => items.len(),
            _ => 1,
        }
    }
}

/// Where a nested operation appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationContext {
    /// Parent rows are being created.
    Create,
    /// Exactly one parent row is being updated.
    UpdateOne,
    /// An arbitrary number of parent rows are being updated.
    UpdateMany,
}

/// One row of a create payload, or the patch of an update: column values
/// plus nested relation operations keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationRow {
    pub values: Record,
    pub nested: Vec<(String, NestedOp)>,
}

impl MutationRow {
    pub fn new(values: Record) -> Self {
        Self {
            values,
            nested: Vec::new(),
        }
    }

    #[must_use]
    pub fn relate(mut self, relation: impl Into<String>, op: NestedOp) -> Self {
        self.nested.push((relation.into(), op));
        self
    }
}

impl From<Record> for MutationRow {
    fn from(values: Record) -> Self {
        Self::new(values)
    }
}

/// Validate `op` against the relation and the context it appears in.
/// Checked during planning, before any statement is issued.
pub fn check_allowed(rel: &ResolvedRelation, op: &NestedOp, ctx: MutationContext) -> Result<()> {
    let config = |message: String| {
        Error::RelationConfig(relmodel_core::RelationConfigError {
            table: rel.table.clone(),
            relation: rel.name.clone(),
            message,
        })
    };

    if rel.is_through() {
        return Err(config(format!(
            "derived relations are read-only, '{}' is not allowed",
            op.name()
        )));
    }

    if ctx == MutationContext::Create
        && matches!(
            op,
            NestedOp::Disconnect(_)
                | NestedOp::Set(_)
                | NestedOp::Delete(_)
                | NestedOp::Update(_)
                | NestedOp::Upsert { .. }
        )
    {
        return Err(config(format!(
            "'{}' is only valid in update payloads",
            op.name()
        )));
    }

    if ctx == MutationContext::UpdateMany {
        let batch_illegal = match op {
            // These need one known parent key to make sense.
            NestedOp::Set(_) | NestedOp::Create(_) | NestedOp::Upsert { .. } => true,
            // Attaching rows to "the" parent is ambiguous when many
            // parents are updated at once, unless the key lives on the
            // updated rows themselves.
            NestedOp::Connect(_) | NestedOp::ConnectOrCreate(_) => {
                rel.kind != RelationKind::BelongsTo
            }
            // Criteria-scoped detach/delete/update stay legal.
            _ => false,
        };
        if batch_illegal {
            return Err(Error::BatchNotAllowed(BatchNotAllowedError {
                relation: rel.name.clone(),
                operation: op.name(),
            }));
        }
    }

    if !rel.kind.is_to_one() && matches!(op, NestedOp::Upsert { .. }) {
        // There is no criteria to pick the row to patch on a to-many side.
        return Err(config("'upsert' is only valid for to-one relations".to_string()));
    }

    if rel.kind.is_to_one() {
        if op.item_count() > 1 {
            return Err(config(format!(
                "'{}' expects a single record for a to-one relation",
                op.name()
            )));
        }
        if rel.required && matches!(op, NestedOp::Disconnect(_)) {
            return Err(config("cannot disconnect a required relation".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::Dialect;
    use std::sync::Arc;

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        Row::new(columns.iter().map(|c| (*c).to_string()).collect(), values)
    }

    fn has_many() -> ResolvedRelation {
        ResolvedRelation {
            table: "users".to_string(),
            name: "posts".to_string(),
            kind: RelationKind::HasMany,
            related_table: "posts".to_string(),
            key_pairs: vec![crate::descriptor::KeyPair {
                owner: "id".to_string(),
                related: "author_id".to_string(),
            }],
            join: None,
            hops: Vec::new(),
            required: false,
        }
    }

    #[test]
    fn record_replaces_duplicates() {
        let r = Record::new().set("name", "a").set("name", "b").set("age", 3);
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("name"), Some(&Value::Text("b".to_string())));
    }

    #[test]
    fn criteria_expr_renders_is_null() {
        let c = Criteria::new().eq("email", Value::Null).eq("active", true);
        let expr = c.to_expr(Some("users")).unwrap();
        let mut params = Vec::new();
        let sql = expr.build_with_dialect(Dialect::Postgres, &mut params, 0);
        assert_eq!(sql, "\"users\".\"email\" IS NULL AND \"users\".\"active\" = $1");
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn criteria_matches_row() {
        let c = Criteria::new().eq("email", "a@b.c");
        let r = row(&["id", "email"], vec![Value::Int(1), Value::Text("a@b.c".to_string())]);
        assert!(c.matches_row(&r));
        let r = row(&["id"], vec![Value::Int(1)]);
        assert!(!c.matches_row(&r));
    }

    #[test]
    fn create_context_rejects_update_only_ops() {
        let rel = has_many();
        let err = check_allowed(&rel, &NestedOp::Delete(TargetSet::All), MutationContext::Create)
            .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));
        check_allowed(&rel, &NestedOp::Create(vec![Record::new()]), MutationContext::Create).unwrap();
    }

    #[test]
    fn batch_update_rejects_ambiguous_ops() {
        let rel = has_many();
        for op in [
            NestedOp::Create(vec![Record::new()]),
            NestedOp::Set(vec![Criteria::new().eq("id", 1)]),
            NestedOp::Upsert {
                update: Record::new(),
                create: Record::new(),
            },
        ] {
            let err = check_allowed(&rel, &op, MutationContext::UpdateMany).unwrap_err();
            assert!(matches!(err, Error::BatchNotAllowed(_)), "op {}", op.name());
        }
        // Criteria-scoped operations stay legal in batch updates.
        check_allowed(
            &rel,
            &NestedOp::Delete(TargetSet::Matching(vec![Criteria::new().eq("id", 1)])),
            MutationContext::UpdateMany,
        )
        .unwrap();
    }

    #[test]
    fn to_one_rejects_multiple_items() {
        let mut rel = has_many();
        rel.kind = RelationKind::HasOne;
        let err = check_allowed(
            &rel,
            &NestedOp::Create(vec![Record::new(), Record::new()]),
            MutationContext::Create,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));
    }

    #[test]
    fn required_belongs_to_cannot_disconnect() {
        let mut rel = has_many();
        rel.kind = RelationKind::BelongsTo;
        rel.required = true;
        let err = check_allowed(&rel, &NestedOp::Disconnect(TargetSet::All), MutationContext::UpdateOne)
            .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));
    }

    #[test]
    fn derived_relations_are_read_only() {
        let mut rel = has_many();
        rel.hops = vec![Arc::new(has_many())];
        let err = check_allowed(
            &rel,
            &NestedOp::Connect(vec![Criteria::new().eq("id", 1)]),
            MutationContext::UpdateOne,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));
    }
}
