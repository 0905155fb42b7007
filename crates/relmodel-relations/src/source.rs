//! High-level entry points over a connection and a relation map.
//!
//! [`Db`] pairs a connection with its resolved relations; [`Table`] exposes
//! the mutation calls. Each call validates its nested payload up front,
//! wraps multi-statement work in a transaction through [`Coordinator`],
//! and rolls everything back on the first failure.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Connection, Dialect, Error, MultipleRecordsError, NotFoundError, RelationConfigError, Result,
    Row, Value,
};
use relmodel_query::{DeleteQuery, Expr, InsertQuery, SelectQuery, UpdateQuery, Where};

use crate::coordinator::Coordinator;
use crate::descriptor::{RelationKind, ResolvedRelation};
use crate::executor::{
    belongs_to, has_many, has_one, insert_returning, insert_single, many_to_many, patch_child_keys,
};
use crate::hooks::{plan_create, plan_update, MutationPlan};
use crate::join::{chain_query, related_query, reverse_join};
use crate::payload::{Criteria, MutationContext, MutationRow, Record};
use crate::registry::RelationMap;
use crate::{try_outcome, try_result, try_tx};

/// A connection paired with the relation map its tables were registered
/// into.
pub struct Db<C: Connection> {
    conn: C,
    relations: Arc<RelationMap>,
}

impl<C: Connection> Db<C> {
    pub fn new(conn: C, relations: RelationMap) -> Self {
        Self {
            conn,
            relations: Arc::new(relations),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn relations(&self) -> &RelationMap {
        &self.relations
    }

    /// Handle for issuing calls against one table.
    pub fn table(&self, name: impl Into<String>) -> Table<'_, C> {
        Table {
            db: self,
            name: name.into(),
        }
    }

    /// Query-composition handle for a registered relation.
    pub fn relation(&self, table: &str, name: &str) -> Result<RelationAccessor> {
        let rel = self.relations.get(table, name)?;
        Ok(RelationAccessor {
            relation: Arc::clone(rel),
        })
    }
}

/// One table of a [`Db`]. Cheap to create, holds no state beyond the name.
pub struct Table<'d, C: Connection> {
    db: &'d Db<C>,
    name: String,
}

impl<C: Connection> Table<'_, C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert one row, applying its nested relation payloads, and return
    /// the inserted row.
    pub async fn create(&self, cx: &Cx, row: MutationRow) -> Outcome<Row, Error> {
        let created = try_outcome!(self.create_many(cx, vec![row]).await);
        match created.into_iter().next() {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::Custom(format!(
                "insert into '{}' returned no rows",
                self.name
            ))),
        }
    }

    /// Insert a batch of rows with their nested payloads in one call.
    ///
    /// All statements of the call run inside a single transaction whenever
    /// any row carries nested work; the first failure rolls the whole call
    /// back.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.name))]
    pub async fn create_many(&self, cx: &Cx, rows: Vec<MutationRow>) -> Outcome<Vec<Row>, Error> {
        let (mut records, plan) =
            try_result!(plan_create(&self.db.relations, &self.name, rows));
        if records.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        let mut coord = Coordinator::new(&self.db.conn);
        if plan.requires_transaction() {
            try_outcome!(coord.begin(cx).await);
        }

        for action in &plan.before {
            try_tx!(
                coord,
                cx,
                belongs_to::before_create(cx, &coord, &action.relation, &action.items, &mut records)
                    .await
            );
        }

        let tagged: Vec<(usize, Record)> = records.into_iter().enumerate().collect();
        let mut created =
            try_tx!(coord, cx, insert_returning(cx, &coord, &self.name, tagged).await);
        created.sort_by_key(|(tag, _)| *tag);
        let parents: Vec<Row> = created.into_iter().map(|(_, row)| row).collect();

        try_outcome!(run_after_actions(cx, &mut coord, &plan, &parents, MutationContext::Create).await);
        try_outcome!(coord.commit(cx).await);
        Outcome::Ok(parents)
    }

    /// Update the single row matching `criteria` and return it.
    ///
    /// Zero matches is a [`NotFoundError`], more than one a
    /// [`MultipleRecordsError`]; either way nothing is written.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.name))]
    pub async fn update_one(
        &self,
        cx: &Cx,
        criteria: Criteria,
        patch: MutationRow,
    ) -> Outcome<Row, Error> {
        let (mut values, plan) = try_result!(plan_update(
            &self.db.relations,
            &self.name,
            patch,
            MutationContext::UpdateOne,
        ));

        let mut coord = Coordinator::new(&self.db.conn);
        if plan.requires_transaction() {
            try_outcome!(coord.begin(cx).await);
        }

        let snapshot = try_tx!(coord, cx, self.snapshot(cx, &coord, &criteria).await);
        if snapshot.is_empty() {
            return coord
                .fail(
                    cx,
                    Error::NotFound(NotFoundError {
                        table: self.name.clone(),
                        message: "no row matches the update target".to_string(),
                    }),
                )
                .await;
        }
        if snapshot.len() > 1 {
            return coord
                .fail(
                    cx,
                    Error::MultipleRecords(MultipleRecordsError {
                        table: self.name.clone(),
                        matched: snapshot.len() as u64,
                    }),
                )
                .await;
        }

        let mut posts = Vec::new();
        for action in &plan.before {
            for (_, op) in &action.items {
                let post = try_tx!(
                    coord,
                    cx,
                    belongs_to::before_update(cx, &coord, &action.relation, op, &mut values, &snapshot)
                        .await
                );
                posts.extend(post);
            }
        }

        let updated =
            try_tx!(coord, cx, self.primary_update(cx, &coord, &values, &criteria, &snapshot).await);

        try_outcome!(
            run_after_actions(cx, &mut coord, &plan, &updated, MutationContext::UpdateOne).await
        );
        for post in posts {
            try_tx!(coord, cx, belongs_to::run_post_action(cx, &coord, post).await);
        }
        try_outcome!(coord.commit(cx).await);

        match updated.into_iter().next() {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::Custom(format!(
                "update of '{}' returned no rows",
                self.name
            ))),
        }
    }

    /// Update every row matching `criteria` and return the affected count.
    ///
    /// Nested payloads whose target row would be ambiguous across the
    /// batch are rejected before any statement is issued.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.name))]
    pub async fn update_many(
        &self,
        cx: &Cx,
        criteria: Criteria,
        patch: MutationRow,
    ) -> Outcome<u64, Error> {
        let (mut values, plan) = try_result!(plan_update(
            &self.db.relations,
            &self.name,
            patch,
            MutationContext::UpdateMany,
        ));

        if plan.is_empty() {
            if values.is_empty() {
                return Outcome::Ok(0);
            }
            let (sql, params) = build_update(&self.name, &values, &criteria).build_with_dialect(self.db.dialect());
            return self.db.conn.execute(cx, &sql, &params).await;
        }

        let mut coord = Coordinator::new(&self.db.conn);
        try_outcome!(coord.begin(cx).await);

        let snapshot = try_tx!(coord, cx, self.snapshot(cx, &coord, &criteria).await);
        if snapshot.is_empty() {
            try_outcome!(coord.commit(cx).await);
            return Outcome::Ok(0);
        }

        let mut posts = Vec::new();
        for action in &plan.before {
            for (_, op) in &action.items {
                let post = try_tx!(
                    coord,
                    cx,
                    belongs_to::before_update(cx, &coord, &action.relation, op, &mut values, &snapshot)
                        .await
                );
                posts.extend(post);
            }
        }

        let updated =
            try_tx!(coord, cx, self.primary_update(cx, &coord, &values, &criteria, &snapshot).await);

        try_outcome!(
            run_after_actions(cx, &mut coord, &plan, &updated, MutationContext::UpdateMany).await
        );
        for post in posts {
            try_tx!(coord, cx, belongs_to::run_post_action(cx, &coord, post).await);
        }
        try_outcome!(coord.commit(cx).await);
        Outcome::Ok(updated.len() as u64)
    }

    /// Delete every row matching `criteria`, returning the affected count.
    pub async fn delete_where(&self, cx: &Cx, criteria: Criteria) -> Outcome<u64, Error> {
        let mut delete = DeleteQuery::new(&self.name);
        if let Some(expr) = criteria.to_expr(None) {
            delete = delete.filter(Where::new(expr));
        }
        let (sql, params) = delete.build_with_dialect(self.db.dialect());
        self.db.conn.execute(cx, &sql, &params).await
    }

    /// First row matching `criteria`; zero matches is a [`NotFoundError`].
    pub async fn find_by(&self, cx: &Cx, criteria: Criteria) -> Outcome<Row, Error> {
        match try_outcome!(self.find_by_optional(cx, criteria).await) {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::NotFound(NotFoundError {
                table: self.name.clone(),
                message: "no row matches the given criteria".to_string(),
            })),
        }
    }

    /// First row matching `criteria`, if any.
    pub async fn find_by_optional(
        &self,
        cx: &Cx,
        criteria: Criteria,
    ) -> Outcome<Option<Row>, Error> {
        let mut query = SelectQuery::new(&self.name);
        if let Some(expr) = criteria.to_expr(None) {
            query = query.and_where(expr);
        }
        let (sql, params) = query.limit(1).build_with_dialect(self.db.dialect());
        self.db.conn.query_one(cx, &sql, &params).await
    }

    /// All rows matching `criteria`.
    pub async fn select(&self, cx: &Cx, criteria: Criteria) -> Outcome<Vec<Row>, Error> {
        let mut query = SelectQuery::new(&self.name);
        if let Some(expr) = criteria.to_expr(None) {
            query = query.and_where(expr);
        }
        let (sql, params) = query.build_with_dialect(self.db.dialect());
        self.db.conn.query(cx, &sql, &params).await
    }

    /// Rows related to `owner` through the named relation.
    pub async fn related(&self, cx: &Cx, relation: &str, owner: &Row) -> Outcome<Vec<Row>, Error> {
        let rel = try_result!(self.db.relations.get(&self.name, relation));
        let query = try_result!(related_query(rel, owner));
        let (sql, params) = query.build_with_dialect(self.db.dialect());
        self.db.conn.query(cx, &sql, &params).await
    }

    /// Insert a row on the related side of a `has_*` relation, keyed to the
    /// single parent matching `parent_criteria`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.name, relation))]
    pub async fn create_related(
        &self,
        cx: &Cx,
        relation: &str,
        parent_criteria: Criteria,
        mut record: Record,
    ) -> Outcome<Row, Error> {
        let rel = try_result!(self.db.relations.get(&self.name, relation));
        if rel.is_through() || rel.kind == RelationKind::BelongsTo {
            return Outcome::Err(Error::RelationConfig(RelationConfigError {
                table: self.name.clone(),
                relation: relation.to_string(),
                message: "creating related rows needs a direct has_one, has_many, \
                          or has_and_belongs_to_many relation"
                    .to_string(),
            }));
        }

        let parent = try_outcome!(self.single_match(cx, &parent_criteria).await);

        if rel.kind == RelationKind::HasAndBelongsToMany {
            self.create_joined(cx, rel, &parent, record).await
        } else {
            try_result!(patch_child_keys(rel, &mut record, &parent));
            let coord = Coordinator::new(&self.db.conn);
            insert_single(cx, &coord, &rel.related_table, record).await
        }
    }

    /// HABTM create: the related row and its join-table link commit
    /// together or not at all.
    async fn create_joined(
        &self,
        cx: &Cx,
        rel: &ResolvedRelation,
        parent: &Row,
        record: Record,
    ) -> Outcome<Row, Error> {
        let Some(join) = rel.join.as_ref() else {
            return Outcome::Err(Error::RelationConfig(RelationConfigError {
                table: self.name.clone(),
                relation: rel.name.clone(),
                message: "relation has no join table keys".to_string(),
            }));
        };
        let key = try_result!(parent.require(&join.primary_key)).clone();

        let mut coord = Coordinator::new(&self.db.conn);
        try_outcome!(coord.begin(cx).await);

        let row = try_tx!(coord, cx, insert_single(cx, &coord, &rel.related_table, record).await);
        let apk = match row.require(&join.association_primary_key) {
            Ok(v) => v.clone(),
            Err(e) => return coord.fail(cx, e).await,
        };
        let link = InsertQuery::new(
            &join.join_table,
            [join.foreign_key.as_str(), join.association_foreign_key.as_str()],
        )
        .row(vec![key, apk]);
        let (sql, params) = link.build_with_dialect(coord.dialect());
        try_tx!(coord, cx, coord.execute(cx, &sql, &params).await);

        try_outcome!(coord.commit(cx).await);
        Outcome::Ok(row)
    }

    async fn snapshot(
        &self,
        cx: &Cx,
        coord: &Coordinator<'_, C>,
        criteria: &Criteria,
    ) -> Outcome<Vec<Row>, Error> {
        let mut query = SelectQuery::new(&self.name);
        if let Some(expr) = criteria.to_expr(None) {
            query = query.and_where(expr);
        }
        let (sql, params) = query.build_with_dialect(coord.dialect());
        coord.query(cx, &sql, &params).await
    }

    /// The primary UPDATE of an update call. Returns the updated rows; on
    /// drivers without RETURNING the patch is applied to the snapshot in
    /// memory instead of re-selecting.
    async fn primary_update(
        &self,
        cx: &Cx,
        coord: &Coordinator<'_, C>,
        values: &Record,
        criteria: &Criteria,
        snapshot: &[Row],
    ) -> Outcome<Vec<Row>, Error> {
        if values.is_empty() {
            return Outcome::Ok(snapshot.to_vec());
        }
        let update = build_update(&self.name, values, criteria);
        if coord.dialect().supports_returning() {
            let (sql, params) = update.returning(["*"]).build_with_dialect(coord.dialect());
            coord.query(cx, &sql, &params).await
        } else {
            let (sql, params) = update.build_with_dialect(coord.dialect());
            try_outcome!(coord.execute(cx, &sql, &params).await);
            Outcome::Ok(snapshot.iter().map(|row| apply_patch(row, values)).collect())
        }
    }

    async fn single_match(&self, cx: &Cx, criteria: &Criteria) -> Outcome<Row, Error> {
        let rows = try_outcome!(self.select(cx, criteria.clone()).await);
        let matched = rows.len() as u64;
        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Outcome::Ok(row),
            (None, _) => Outcome::Err(Error::NotFound(NotFoundError {
                table: self.name.clone(),
                message: "no row matches the given criteria".to_string(),
            })),
            (Some(_), Some(_)) => Outcome::Err(Error::MultipleRecords(MultipleRecordsError {
                table: self.name.clone(),
                matched,
            })),
        }
    }
}

/// Dispatch the post-primary phase of a plan, per relation kind. Create
/// calls attach by payload-row index; update calls apply each op against
/// the updated rows.
async fn run_after_actions<C: Connection>(
    cx: &Cx,
    coord: &mut Coordinator<'_, C>,
    plan: &MutationPlan,
    parents: &[Row],
    ctx: MutationContext,
) -> Outcome<(), Error> {
    for action in &plan.after {
        let rel = &action.relation;
        if ctx == MutationContext::Create {
            match rel.kind {
                RelationKind::HasOne => {
                    try_tx!(
                        coord,
                        cx,
                        has_one::after_create(cx, coord, rel, &action.items, parents).await
                    );
                }
                RelationKind::HasMany => {
                    try_tx!(
                        coord,
                        cx,
                        has_many::after_create(cx, coord, rel, &action.items, parents).await
                    );
                }
                RelationKind::HasAndBelongsToMany => {
                    try_tx!(
                        coord,
                        cx,
                        many_to_many::after_create(cx, coord, rel, &action.items, parents).await
                    );
                }
                RelationKind::BelongsTo => {
                    debug_assert!(false, "belongs_to scheduled after the primary statement");
                }
            }
            continue;
        }
        for (_, op) in &action.items {
            match rel.kind {
                RelationKind::HasOne => {
                    try_tx!(coord, cx, has_one::after_update(cx, coord, rel, op, parents).await);
                }
                RelationKind::HasMany => {
                    try_tx!(coord, cx, has_many::after_update(cx, coord, rel, op, parents).await);
                }
                RelationKind::HasAndBelongsToMany => {
                    try_tx!(
                        coord,
                        cx,
                        many_to_many::after_update(cx, coord, rel, op, parents).await
                    );
                }
                RelationKind::BelongsTo => {
                    debug_assert!(false, "belongs_to scheduled after the primary statement");
                }
            }
        }
    }
    Outcome::Ok(())
}

fn build_update(table: &str, values: &Record, criteria: &Criteria) -> UpdateQuery {
    let mut update = UpdateQuery::new(table);
    for (column, value) in values.entries() {
        update = update.set(column.clone(), value.clone());
    }
    if let Some(expr) = criteria.to_expr(None) {
        update = update.filter(Where::new(expr));
    }
    update
}

/// Overlay `patch` onto a row, adding columns the row does not carry.
fn apply_patch(row: &Row, patch: &Record) -> Row {
    let mut columns: Vec<String> = row.column_names().map(str::to_string).collect();
    let mut values: Vec<Value> = row.values().cloned().collect();
    for (column, value) in patch.entries() {
        if let Some(pos) = columns.iter().position(|c| c == column) {
            values[pos] = value.clone();
        } else {
            columns.push(column.clone());
            values.push(value.clone());
        }
    }
    Row::new(columns, values)
}

/// A resolved relation bundled with the query-composition entry points.
pub struct RelationAccessor {
    relation: Arc<ResolvedRelation>,
}

impl RelationAccessor {
    pub fn relation(&self) -> &ResolvedRelation {
        &self.relation
    }

    /// Rows related to one owning row.
    pub fn query_for(&self, owner: &Row) -> Result<SelectQuery> {
        related_query(&self.relation, owner)
    }

    /// Wrap a query over the owning table into one over the related table.
    pub fn chain(&self, base: SelectQuery) -> SelectQuery {
        chain_query(&self.relation, base)
    }

    /// Predicate over the owning table: rows with at least one related row
    /// satisfying `related`.
    pub fn filter(&self, related: SelectQuery) -> Expr {
        reverse_join(&self.relation, related)
    }

    /// Predicate over the owning table: rows with no related row
    /// satisfying `related`.
    pub fn filter_none(&self, related: SelectQuery) -> Expr {
        reverse_join(&self.relation, related).not()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RelationDescriptor;
    use crate::payload::NestedOp;
    use crate::registry::RelationRegistry;
    use crate::testing::{row, MockConnection};
    use asupersync::runtime::RuntimeBuilder;
    use std::future::Future;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn blog_relations() -> RelationMap {
        let mut registry = RelationRegistry::new();
        registry
            .register(
                "users",
                "posts",
                RelationDescriptor::has_many("posts").keys("id", "user_id"),
            )
            .unwrap();
        registry
            .register(
                "posts",
                "author",
                RelationDescriptor::belongs_to("users").keys("user_id", "id"),
            )
            .unwrap();
        registry.finish().unwrap()
    }

    fn run<F: Future>(fut: F) -> F::Output {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(fut)
    }

    #[test]
    fn plain_create_skips_the_transaction() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.push_rows(vec![row(&[("id", Value::Int(1)), ("name", Value::Text("a".into()))])]);
        let db = Db::new(conn, blog_relations());

        run(async {
            let created = unwrap_outcome(
                db.table("users")
                    .create(&cx, MutationRow::new(Record::new().set("name", "a")))
                    .await,
            );
            assert_eq!(created.get_by_name("id"), Some(&Value::Int(1)));
        });

        let log = db.connection().sql_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("INSERT INTO \"users\""));
        assert!(log[0].ends_with("RETURNING *"));
    }

    #[test]
    fn nested_create_propagates_parent_keys() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.push_rows(vec![row(&[("id", Value::Int(7)), ("name", Value::Text("a".into()))])]);
        let db = Db::new(conn, blog_relations());

        run(async {
            let payload = MutationRow::new(Record::new().set("name", "a")).relate(
                "posts",
                NestedOp::Create(vec![Record::new().set("title", "hello")]),
            );
            unwrap_outcome(db.table("users").create(&cx, payload).await);
        });

        let stmts = db.connection().statements();
        let log: Vec<&str> = stmts.iter().map(|(sql, _)| sql.as_str()).collect();
        assert_eq!(log[0], "BEGIN");
        assert!(log[1].starts_with("INSERT INTO \"users\""));
        assert!(log[2].starts_with("INSERT INTO \"posts\""));
        assert_eq!(log[3], "COMMIT");
        // the child insert carries the parent's key
        assert!(stmts[2].1.contains(&Value::Int(7)));
    }

    #[test]
    fn nested_failure_rolls_the_call_back() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.push_rows(vec![row(&[("id", Value::Int(7))])]);
        conn.fail_when("INSERT INTO \"posts\"");
        let db = Db::new(conn, blog_relations());

        run(async {
            let payload = MutationRow::new(Record::new().set("name", "a")).relate(
                "posts",
                NestedOp::Create(vec![Record::new().set("title", "boom")]),
            );
            let out = db.table("users").create(&cx, payload).await;
            assert!(matches!(out, Outcome::Err(Error::Query(_))));
        });

        let log = db.connection().sql_log();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.iter().any(|s| s == "COMMIT"));
    }

    #[test]
    fn connect_on_create_resolves_the_target_first() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        // candidate lookup, then the primary insert
        conn.push_rows(vec![row(&[("id", Value::Int(3)), ("name", Value::Text("b".into()))])]);
        conn.push_rows(vec![row(&[("id", Value::Int(9)), ("user_id", Value::Int(3))])]);
        let db = Db::new(conn, blog_relations());

        run(async {
            let payload = MutationRow::new(Record::new().set("title", "t")).relate(
                "author",
                NestedOp::Connect(vec![Criteria::new().eq("id", 3)]),
            );
            let created = unwrap_outcome(db.table("posts").create(&cx, payload).await);
            assert_eq!(created.get_by_name("user_id"), Some(&Value::Int(3)));
        });

        let stmts = db.connection().statements();
        assert!(stmts[1].0.starts_with("SELECT * FROM \"users\""));
        assert!(stmts[2].0.starts_with("INSERT INTO \"posts\""));
        assert!(stmts[2].1.contains(&Value::Int(3)));
    }

    #[test]
    fn update_one_requires_exactly_one_match() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.push_rows(vec![]);
        let db = Db::new(conn, blog_relations());

        run(async {
            let out = db
                .table("users")
                .update_one(
                    &cx,
                    Criteria::new().eq("id", 5),
                    MutationRow::new(Record::new().set("name", "x")),
                )
                .await;
            assert!(matches!(out, Outcome::Err(Error::NotFound(_))));
        });

        let log = db.connection().sql_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("SELECT * FROM \"users\""));
    }

    #[test]
    fn batch_update_rejects_ambiguous_payloads_before_writing() {
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let db = Db::new(conn, blog_relations());

        run(async {
            let payload = MutationRow::new(Record::new()).relate(
                "posts",
                NestedOp::Set(vec![Criteria::new().eq("id", 1)]),
            );
            let out = db
                .table("users")
                .update_many(&cx, Criteria::new(), payload)
                .await;
            assert!(matches!(out, Outcome::Err(Error::BatchNotAllowed(_))));
        });

        assert!(db.connection().sql_log().is_empty());
    }
}
