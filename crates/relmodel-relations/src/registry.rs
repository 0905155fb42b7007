//! Relation registry with deferred resolution of derived relations.
//!
//! Relations register in any order. A derived (`through`) relation whose
//! dependencies have not been registered yet is parked on a worklist and
//! replayed after every successful registration, so the final map is the
//! same regardless of registration order. [`RelationRegistry::finish`]
//! fails if anything is still unresolved.

use std::collections::HashMap;
use std::sync::Arc;

use relmodel_core::{Error, RelationConfigError, Result};

use crate::descriptor::{
    KeyPair, RelationDescriptor, RelationKeys, RelationKind, ResolvedRelation,
};

#[derive(Debug)]
struct PendingThrough {
    table: String,
    name: String,
    descriptor: RelationDescriptor,
}

/// Mutable registration surface. Collects descriptors, resolves them, and
/// hands out an immutable [`RelationMap`] once everything is in.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    resolved: HashMap<String, HashMap<String, Arc<ResolvedRelation>>>,
    pending: Vec<PendingThrough>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` on `table`. Derived relations whose dependencies are
    /// missing are deferred, not rejected; everything else resolves
    /// immediately or fails with a configuration error.
    #[tracing::instrument(level = "debug", skip(self, descriptor))]
    pub fn register(
        &mut self,
        table: &str,
        name: &str,
        descriptor: RelationDescriptor,
    ) -> Result<()> {
        validate(table, name, &descriptor)?;
        if self.lookup(table, name).is_some()
            || self.pending.iter().any(|p| p.table == table && p.name == name)
        {
            return Err(config_error(table, name, "relation is already registered"));
        }

        match resolve(&self.resolved, table, name, &descriptor)? {
            Some(rel) => {
                tracing::debug!(table, name, kind = %rel.kind, "relation resolved");
                self.insert(rel);
                self.replay_pending()?;
            }
            None => {
                tracing::debug!(table, name, "relation deferred, dependency not yet registered");
                self.pending.push(PendingThrough {
                    table: table.to_string(),
                    name: name.to_string(),
                    descriptor,
                });
            }
        }
        Ok(())
    }

    /// Re-run every parked derived relation until no further progress is
    /// made. Each pass retries all of them, so chains of derived relations
    /// settle regardless of how deep they stack.
    fn replay_pending(&mut self) -> Result<()> {
        loop {
            let mut progressed = false;
            let mut still_pending = Vec::with_capacity(self.pending.len());
            for item in std::mem::take(&mut self.pending) {
                match resolve(&self.resolved, &item.table, &item.name, &item.descriptor)? {
                    Some(rel) => {
                        tracing::debug!(table = %item.table, name = %item.name, "deferred relation resolved");
                        self.insert(rel);
                        progressed = true;
                    }
                    None => still_pending.push(item),
                }
            }
            self.pending = still_pending;
            if !progressed || self.pending.is_empty() {
                return Ok(());
            }
        }
    }

    fn insert(&mut self, rel: ResolvedRelation) {
        self.resolved
            .entry(rel.table.clone())
            .or_default()
            .insert(rel.name.clone(), Arc::new(rel));
    }

    fn lookup(&self, table: &str, name: &str) -> Option<&Arc<ResolvedRelation>> {
        self.resolved.get(table).and_then(|m| m.get(name))
    }

    /// Number of derived relations still waiting on a dependency.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Seal the registry. Errors if any derived relation never found its
    /// dependencies, naming the first missing link.
    pub fn finish(self) -> Result<RelationMap> {
        if let Some(item) = self.pending.first() {
            let missing = describe_missing(&self.resolved, &item.table, &item.descriptor);
            return Err(config_error(
                &item.table,
                &item.name,
                &format!("derived relation cannot be resolved: {missing}"),
            ));
        }
        Ok(RelationMap {
            tables: self.resolved,
        })
    }
}

/// Immutable, fully resolved relation map shared across a data source.
#[derive(Debug, Default)]
pub struct RelationMap {
    tables: HashMap<String, HashMap<String, Arc<ResolvedRelation>>>,
}

impl RelationMap {
    pub fn get(&self, table: &str, name: &str) -> Result<&Arc<ResolvedRelation>> {
        self.tables
            .get(table)
            .and_then(|m| m.get(name))
            .ok_or_else(|| config_error(table, name, "unknown relation"))
    }

    pub fn contains(&self, table: &str, name: &str) -> bool {
        self.tables.get(table).is_some_and(|m| m.contains_key(name))
    }

    /// Resolved relations declared on `table`, in arbitrary order.
    pub fn relations_of(&self, table: &str) -> impl Iterator<Item = &Arc<ResolvedRelation>> {
        self.tables.get(table).into_iter().flat_map(|m| m.values())
    }
}

fn config_error(table: &str, relation: &str, message: &str) -> Error {
    Error::RelationConfig(RelationConfigError {
        table: table.to_string(),
        relation: relation.to_string(),
        message: message.to_string(),
    })
}

fn validate(table: &str, name: &str, descriptor: &RelationDescriptor) -> Result<()> {
    match (&descriptor.keys, descriptor.kind) {
        (RelationKeys::Direct { columns, references }, _) => {
            if columns.is_empty() || columns.len() != references.len() {
                return Err(config_error(
                    table,
                    name,
                    "column and reference lists must be non-empty and of equal length",
                ));
            }
        }
        (RelationKeys::Named { foreign_key, primary_key }, _) => {
            if foreign_key.is_empty() || primary_key.is_empty() {
                return Err(config_error(table, name, "key columns must be named"));
            }
        }
        (RelationKeys::Through { .. }, RelationKind::HasOne | RelationKind::HasMany) => {}
        (RelationKeys::Through { .. }, _) => {
            return Err(config_error(
                table,
                name,
                "derived relations are only valid for has_one and has_many",
            ));
        }
        (RelationKeys::Join(keys), RelationKind::HasAndBelongsToMany) => {
            if keys.foreign_key.is_empty() || keys.association_foreign_key.is_empty() {
                return Err(config_error(
                    table,
                    name,
                    "join table foreign key columns must be named",
                ));
            }
        }
        (RelationKeys::Join(_), _) => {
            return Err(config_error(
                table,
                name,
                "join table keys are only valid for has_and_belongs_to_many",
            ));
        }
    }
    if matches!(descriptor.kind, RelationKind::HasAndBelongsToMany)
        && !matches!(descriptor.keys, RelationKeys::Join(_))
    {
        return Err(config_error(
            table,
            name,
            "has_and_belongs_to_many requires join table keys",
        ));
    }
    Ok(())
}

/// Attempt to resolve a descriptor against what is registered so far.
/// `Ok(None)` means a derived relation's dependency is missing and the
/// descriptor should be parked.
fn resolve(
    resolved: &HashMap<String, HashMap<String, Arc<ResolvedRelation>>>,
    table: &str,
    name: &str,
    descriptor: &RelationDescriptor,
) -> Result<Option<ResolvedRelation>> {
    let rel = match &descriptor.keys {
        RelationKeys::Direct { columns, references } => ResolvedRelation {
            table: table.to_string(),
            name: name.to_string(),
            kind: descriptor.kind,
            related_table: descriptor.related_table.clone(),
            key_pairs: columns
                .iter()
                .zip(references)
                .map(|(c, r)| KeyPair {
                    owner: c.clone(),
                    related: r.clone(),
                })
                .collect(),
            join: None,
            hops: Vec::new(),
            required: descriptor.required,
        },
        RelationKeys::Named { primary_key, foreign_key } => {
            // belongs_to carries the foreign key itself; has_one/has_many
            // put it on the related table.
            let pair = match descriptor.kind {
                RelationKind::BelongsTo => KeyPair {
                    owner: foreign_key.clone(),
                    related: primary_key.clone(),
                },
                _ => KeyPair {
                    owner: primary_key.clone(),
                    related: foreign_key.clone(),
                },
            };
            ResolvedRelation {
                table: table.to_string(),
                name: name.to_string(),
                kind: descriptor.kind,
                related_table: descriptor.related_table.clone(),
                key_pairs: vec![pair],
                join: None,
                hops: Vec::new(),
                required: descriptor.required,
            }
        }
        RelationKeys::Join(keys) => ResolvedRelation {
            table: table.to_string(),
            name: name.to_string(),
            kind: descriptor.kind,
            related_table: descriptor.related_table.clone(),
            key_pairs: Vec::new(),
            join: Some(keys.clone()),
            hops: Vec::new(),
            required: descriptor.required,
        },
        RelationKeys::Through { through, source } => {
            let Some(first) = resolved.get(table).and_then(|m| m.get(through)) else {
                return Ok(None);
            };
            let intermediate = first.related_table.clone();
            let Some(second) = resolved.get(&intermediate).and_then(|m| m.get(source)) else {
                return Ok(None);
            };
            let mut hops: Vec<Arc<ResolvedRelation>> = Vec::new();
            flatten_into(&mut hops, first);
            flatten_into(&mut hops, second);
            let related_table = hops
                .last()
                .map(|h| h.related_table.clone())
                .unwrap_or_default();
            ResolvedRelation {
                table: table.to_string(),
                name: name.to_string(),
                kind: descriptor.kind,
                related_table,
                key_pairs: Vec::new(),
                join: None,
                hops,
                required: descriptor.required,
            }
        }
    };
    Ok(Some(rel))
}

/// Splice a hop into a chain, expanding derived hops into their own chains
/// so the stored chain is always flat.
fn flatten_into(hops: &mut Vec<Arc<ResolvedRelation>>, rel: &Arc<ResolvedRelation>) {
    if rel.hops.is_empty() {
        hops.push(Arc::clone(rel));
    } else {
        hops.extend(rel.hops.iter().cloned());
    }
}

fn describe_missing(
    resolved: &HashMap<String, HashMap<String, Arc<ResolvedRelation>>>,
    table: &str,
    descriptor: &RelationDescriptor,
) -> String {
    if let RelationKeys::Through { through, source } = &descriptor.keys {
        match resolved.get(table).and_then(|m| m.get(through)) {
            None => format!("relation '{through}' is not registered on '{table}'"),
            Some(first) => format!(
                "relation '{source}' is not registered on '{}'",
                first.related_table
            ),
        }
    } else {
        "dependency is not registered".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::JoinTableKeys;

    fn post_tags_join() -> JoinTableKeys {
        JoinTableKeys::new("posts_tags")
            .foreign_key("post_id")
            .association_foreign_key("tag_id")
    }

    #[test]
    fn resolves_named_keys_per_kind() {
        let mut reg = RelationRegistry::new();
        reg.register("posts", "author", RelationDescriptor::belongs_to("users").keys("id", "author_id"))
            .unwrap();
        reg.register("users", "posts", RelationDescriptor::has_many("posts").keys("id", "author_id"))
            .unwrap();
        let map = reg.finish().unwrap();

        let author = map.get("posts", "author").unwrap();
        assert_eq!(author.key_pairs[0].owner, "author_id");
        assert_eq!(author.key_pairs[0].related, "id");

        let posts = map.get("users", "posts").unwrap();
        assert_eq!(posts.key_pairs[0].owner, "id");
        assert_eq!(posts.key_pairs[0].related, "author_id");
    }

    #[test]
    fn through_defers_until_dependencies_arrive() {
        let mut reg = RelationRegistry::new();
        // Registered first, even though both dependencies come later.
        reg.register("users", "post_tags", RelationDescriptor::has_many("tags").through("posts", "tags"))
            .unwrap();
        assert_eq!(reg.pending_count(), 1);

        reg.register("users", "posts", RelationDescriptor::has_many("posts").keys("id", "author_id"))
            .unwrap();
        assert_eq!(reg.pending_count(), 1);

        reg.register(
            "posts",
            "tags",
            RelationDescriptor::has_and_belongs_to_many("tags").join_table(post_tags_join()),
        )
        .unwrap();
        assert_eq!(reg.pending_count(), 0);

        let map = reg.finish().unwrap();
        let chain = map.get("users", "post_tags").unwrap();
        assert!(chain.is_through());
        assert_eq!(chain.related_table, "tags");
        assert_eq!(chain.hops.len(), 2);
        assert_eq!(chain.hops[0].related_table, "posts");
        assert_eq!(chain.hops[1].related_table, "tags");
    }

    #[test]
    fn resolution_is_order_independent() {
        let forward = {
            let mut reg = RelationRegistry::new();
            reg.register("users", "posts", RelationDescriptor::has_many("posts").keys("id", "author_id")).unwrap();
            reg.register("posts", "comments", RelationDescriptor::has_many("comments").keys("id", "post_id")).unwrap();
            reg.register("users", "comments", RelationDescriptor::has_many("comments").through("posts", "comments")).unwrap();
            reg.finish().unwrap()
        };
        let reverse = {
            let mut reg = RelationRegistry::new();
            reg.register("users", "comments", RelationDescriptor::has_many("comments").through("posts", "comments")).unwrap();
            reg.register("posts", "comments", RelationDescriptor::has_many("comments").keys("id", "post_id")).unwrap();
            reg.register("users", "posts", RelationDescriptor::has_many("posts").keys("id", "author_id")).unwrap();
            reg.finish().unwrap()
        };
        let a = forward.get("users", "comments").unwrap();
        let b = reverse.get("users", "comments").unwrap();
        assert_eq!(a.related_table, b.related_table);
        assert_eq!(a.hops.len(), b.hops.len());
        assert_eq!(a.hops[0].name, b.hops[0].name);
    }

    #[test]
    fn chained_through_flattens() {
        let mut reg = RelationRegistry::new();
        reg.register("users", "posts", RelationDescriptor::has_many("posts").keys("id", "author_id")).unwrap();
        reg.register("posts", "comments", RelationDescriptor::has_many("comments").keys("id", "post_id")).unwrap();
        reg.register("users", "comments", RelationDescriptor::has_many("comments").through("posts", "comments")).unwrap();
        reg.register("comments", "votes", RelationDescriptor::has_many("votes").keys("id", "comment_id")).unwrap();
        reg.register("users", "comment_votes", RelationDescriptor::has_many("votes").through("comments", "votes")).unwrap();
        let map = reg.finish().unwrap();

        let votes = map.get("users", "comment_votes").unwrap();
        assert_eq!(votes.hops.len(), 3);
        assert_eq!(votes.related_table, "votes");
        assert!(votes.hops.iter().all(|h| !h.is_through()));
    }

    #[test]
    fn finish_names_the_missing_link() {
        let mut reg = RelationRegistry::new();
        reg.register("users", "tags", RelationDescriptor::has_many("tags").through("posts", "tags")).unwrap();
        let err = reg.finish().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'posts'"), "unexpected message: {msg}");
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = RelationRegistry::new();
        reg.register("posts", "author", RelationDescriptor::belongs_to("users").keys("id", "author_id")).unwrap();
        let err = reg
            .register("posts", "author", RelationDescriptor::belongs_to("users").keys("id", "author_id"))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn invalid_shapes_rejected() {
        let mut reg = RelationRegistry::new();
        let err = reg
            .register("posts", "author", RelationDescriptor::belongs_to("users").columns(&["a"], &[]))
            .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));

        let err = reg
            .register("posts", "author", RelationDescriptor::belongs_to("users").through("x", "y"))
            .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));

        let err = reg
            .register("posts", "tags", RelationDescriptor::has_and_belongs_to_many("tags").keys("id", "tag_id"))
            .unwrap_err();
        assert!(matches!(err, Error::RelationConfig(_)));
    }
}
