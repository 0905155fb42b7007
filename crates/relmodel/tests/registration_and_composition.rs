//! Registry behavior through the public API: order-independent resolution
//! of derived relations, unresolved-link reporting, and query composition
//! over a registry-built map.

use relmodel::testing::MockConnection;
use relmodel::{
    Db, Dialect, Error, Expr, RelationDescriptor, RelationMap, RelationRegistry, SelectQuery,
};

fn descriptors() -> Vec<(&'static str, &'static str, RelationDescriptor)> {
    vec![
        (
            "users",
            "posts",
            RelationDescriptor::has_many("posts").keys("id", "user_id"),
        ),
        (
            "posts",
            "comments",
            RelationDescriptor::has_many("comments").keys("id", "post_id"),
        ),
        (
            "users",
            "comments",
            RelationDescriptor::has_many("comments").through("posts", "comments"),
        ),
    ]
}

fn finish(order: &[usize]) -> RelationMap {
    let mut registry = RelationRegistry::new();
    for &i in order {
        let (table, name, descriptor) = descriptors().swap_remove(i);
        registry.register(table, name, descriptor).unwrap();
    }
    registry.finish().unwrap()
}

#[test]
fn derived_relations_resolve_in_any_order() {
    let forward = finish(&[0, 1, 2]);
    let reversed = finish(&[2, 1, 0]);

    for map in [&forward, &reversed] {
        let rel = map.get("users", "comments").unwrap();
        assert_eq!(rel.related_table, "comments");
        assert_eq!(rel.hops.len(), 2);
        assert_eq!(rel.hops[0].related_table, "posts");
        assert_eq!(rel.hops[1].related_table, "comments");
    }
}

#[test]
fn unresolved_links_are_reported_by_name() {
    let mut registry = RelationRegistry::new();
    registry
        .register(
            "users",
            "comments",
            RelationDescriptor::has_many("comments").through("posts", "comments"),
        )
        .unwrap();

    let err = registry.finish().unwrap_err();
    match err {
        Error::RelationConfig(e) => {
            assert_eq!(e.table, "users");
            assert_eq!(e.relation, "comments");
            assert!(e.message.contains("posts"), "message was: {}", e.message);
        }
        other => panic!("expected a configuration error, got {other}"),
    }
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = RelationRegistry::new();
    registry
        .register(
            "users",
            "posts",
            RelationDescriptor::has_many("posts").keys("id", "user_id"),
        )
        .unwrap();
    let err = registry
        .register(
            "users",
            "posts",
            RelationDescriptor::has_many("posts").keys("id", "user_id"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::RelationConfig(_)));
}

#[test]
fn accessor_composes_exists_predicates() {
    let db = Db::new(MockConnection::new(), finish(&[0, 1, 2]));

    // users with at least one published post
    let posts = SelectQuery::new("posts").and_where(Expr::col("published").eq(Expr::lit(true)));
    let pred = db.relation("users", "posts").unwrap().filter(posts);
    let (sql, _) = SelectQuery::new("users")
        .and_where(pred)
        .build_with_dialect(Dialect::Postgres);
    assert_eq!(
        sql,
        "SELECT * FROM \"users\" WHERE EXISTS (SELECT 1 FROM \"posts\" \
         WHERE \"published\" = $1 \
         AND \"posts\".\"user_id\" = \"users\".\"id\")"
    );

    // derived relation: users reachable comments, chained through posts
    let accessor = db.relation("users", "comments").unwrap();
    let base = SelectQuery::new("users").and_where(Expr::col("id").eq(Expr::lit(7)));
    let (sql, _) = accessor.chain(base).build_with_dialect(Dialect::Postgres);
    assert!(sql.starts_with("SELECT * FROM \"comments\" WHERE EXISTS (SELECT 1 FROM \"posts\""));
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"users\""));
}

#[test]
fn unknown_relations_fail_lookup() {
    let db = Db::new(MockConnection::new(), finish(&[0, 1, 2]));
    assert!(matches!(
        db.relation("users", "nope"),
        Err(Error::RelationConfig(_))
    ));
}
