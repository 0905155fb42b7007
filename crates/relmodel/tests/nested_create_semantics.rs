//! Nested create calls: key propagation, connect-or-create idempotence,
//! required relations, and all-or-nothing rollback.

use std::future::Future;

use asupersync::runtime::RuntimeBuilder;
use relmodel::testing::{row, MockConnection};
use relmodel::{
    Criteria, Cx, Db, Error, MutationRow, NestedOp, Outcome, Record, RelationDescriptor,
    RelationMap, RelationRegistry, Value,
};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn run<T>(fut: impl Future<Output = T>) -> T {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(fut)
}

fn blog_relations(author_required: bool) -> RelationMap {
    let mut registry = RelationRegistry::new();
    registry
        .register(
            "users",
            "posts",
            RelationDescriptor::has_many("posts").keys("id", "user_id"),
        )
        .unwrap();
    let mut author = RelationDescriptor::belongs_to("users").keys("user_id", "id");
    if author_required {
        author = author.required();
    }
    registry.register("posts", "author", author).unwrap();
    registry.finish().unwrap()
}

#[test]
fn created_children_carry_the_parent_key() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[
        ("id", Value::Int(7)),
        ("name", Value::Text("alice".into())),
    ])]);
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("name", "alice")).relate(
            "posts",
            NestedOp::Create(vec![
                Record::new().set("title", "first"),
                Record::new().set("title", "second"),
            ]),
        );
        let user = unwrap_outcome(db.table("users").create(&cx, payload).await);
        assert_eq!(user.get_by_name("id"), Some(&Value::Int(7)));
    });

    let stmts = db.connection().statements();
    let log: Vec<&str> = stmts.iter().map(|(sql, _)| sql.as_str()).collect();
    assert_eq!(log[0], "BEGIN");
    assert!(log[1].starts_with("INSERT INTO \"users\""));
    assert!(log[2].starts_with("INSERT INTO \"posts\""));
    assert_eq!(log[3], "COMMIT");
    // both children in one statement, each pointing at the parent
    assert_eq!(
        stmts[2].1.iter().filter(|v| **v == Value::Int(7)).count(),
        2
    );
}

#[test]
fn connect_or_create_reuses_an_existing_row() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    // the candidate lookup finds the author, so no user insert happens
    conn.push_rows(vec![row(&[("id", Value::Int(3))])]);
    conn.push_rows(vec![row(&[
        ("id", Value::Int(20)),
        ("user_id", Value::Int(3)),
    ])]);
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("title", "t")).relate(
            "author",
            NestedOp::ConnectOrCreate(vec![relmodel::ConnectOrCreate {
                matching: Criteria::new().eq("id", 3),
                create: Record::new().set("id", 3).set("name", "alice"),
            }]),
        );
        let post = unwrap_outcome(db.table("posts").create(&cx, payload).await);
        assert_eq!(post.get_by_name("user_id"), Some(&Value::Int(3)));
    });

    let log = db.connection().sql_log();
    assert!(!log.iter().any(|sql| sql.starts_with("INSERT INTO \"users\"")));
}

#[test]
fn connect_or_create_creates_on_a_miss() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![]); // lookup misses
    conn.push_rows(vec![row(&[("id", Value::Int(5))])]); // created author
    conn.push_rows(vec![row(&[
        ("id", Value::Int(21)),
        ("user_id", Value::Int(5)),
    ])]);
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("title", "t")).relate(
            "author",
            NestedOp::ConnectOrCreate(vec![relmodel::ConnectOrCreate {
                matching: Criteria::new().eq("name", "bob"),
                create: Record::new().set("name", "bob"),
            }]),
        );
        let post = unwrap_outcome(db.table("posts").create(&cx, payload).await);
        assert_eq!(post.get_by_name("user_id"), Some(&Value::Int(5)));
    });

    let log = db.connection().sql_log();
    assert!(log.iter().any(|sql| sql.starts_with("INSERT INTO \"users\"")));
}

#[test]
fn missing_connect_target_rolls_everything_back() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![]); // lookup misses
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("title", "t")).relate(
            "author",
            NestedOp::Connect(vec![Criteria::new().eq("id", 99)]),
        );
        let out = db.table("posts").create(&cx, payload).await;
        assert!(matches!(out, Outcome::Err(Error::NotFound(_))));
    });

    let log = db.connection().sql_log();
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|sql| sql.starts_with("INSERT INTO \"posts\"")));
}

#[test]
fn connect_requires_every_group_to_match() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[("id", Value::Int(7))])]); // inserted user
    // candidate lookup: two rows satisfy the first group, none the second
    conn.push_rows(vec![
        row(&[("id", Value::Int(1)), ("published", Value::Bool(true))]),
        row(&[("id", Value::Int(2)), ("published", Value::Bool(true))]),
    ]);
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("name", "alice")).relate(
            "posts",
            NestedOp::Connect(vec![
                Criteria::new().eq("published", true),
                Criteria::new().eq("id", 999),
            ]),
        );
        let out = db.table("users").create(&cx, payload).await;
        assert!(matches!(out, Outcome::Err(Error::NotFound(_))));
    });

    let log = db.connection().sql_log();
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|sql| sql.starts_with("UPDATE \"posts\"")));
}

#[test]
fn connect_accepts_groups_that_share_one_row() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[("id", Value::Int(7))])]); // inserted user
    // one candidate satisfies both groups
    conn.push_rows(vec![row(&[
        ("id", Value::Int(5)),
        ("slug", Value::Text("a".into())),
    ])]);
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("name", "alice")).relate(
            "posts",
            NestedOp::Connect(vec![
                Criteria::new().eq("id", 5),
                Criteria::new().eq("slug", "a"),
            ]),
        );
        unwrap_outcome(db.table("users").create(&cx, payload).await);
    });

    let stmts = db.connection().statements();
    let updates: Vec<&(String, Vec<Value>)> = stmts
        .iter()
        .filter(|(sql, _)| sql.starts_with("UPDATE \"posts\""))
        .collect();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].1.contains(&Value::Int(7)));
    let log = db.connection().sql_log();
    assert_eq!(log.last().map(String::as_str), Some("COMMIT"));
}

#[test]
fn cancelled_nested_mutation_rolls_back() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[("id", Value::Int(7))])]);
    conn.cancel_when("INSERT INTO \"posts\"");
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("name", "alice")).relate(
            "posts",
            NestedOp::Create(vec![Record::new().set("title", "t")]),
        );
        let out = db.table("users").create(&cx, payload).await;
        assert!(matches!(out, Outcome::Cancelled(_)));
    });

    let log = db.connection().sql_log();
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|sql| sql == "COMMIT"));
}

#[test]
fn required_relation_must_appear_in_the_payload() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    let db = Db::new(conn, blog_relations(true));

    run(async {
        let out = db
            .table("posts")
            .create(&cx, MutationRow::new(Record::new().set("title", "orphan")))
            .await;
        assert!(matches!(out, Outcome::Err(Error::RelationConfig(_))));
    });

    // rejected during planning, nothing was sent to the database
    assert!(db.connection().sql_log().is_empty());
}

#[test]
fn required_relation_is_satisfied_by_a_raw_key_column() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[
        ("id", Value::Int(1)),
        ("user_id", Value::Int(3)),
    ])]);
    let db = Db::new(conn, blog_relations(true));

    run(async {
        let payload = MutationRow::new(Record::new().set("title", "t").set("user_id", 3));
        unwrap_outcome(db.table("posts").create(&cx, payload).await);
    });
}

#[test]
fn nested_failure_leaves_no_partial_writes() {
    let cx = Cx::for_testing();
    let conn = MockConnection::new();
    conn.push_rows(vec![row(&[("id", Value::Int(7))])]);
    conn.fail_when("INSERT INTO \"posts\"");
    let db = Db::new(conn, blog_relations(false));

    run(async {
        let payload = MutationRow::new(Record::new().set("name", "alice")).relate(
            "posts",
            NestedOp::Create(vec![Record::new().set("title", "boom")]),
        );
        let out = db.table("users").create(&cx, payload).await;
        assert!(matches!(out, Outcome::Err(Error::Query(_))));
    });

    let log = db.connection().sql_log();
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|sql| sql == "COMMIT"));
}
