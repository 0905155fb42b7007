//! Relation descriptors and their resolved form.
//!
//! A [`RelationDescriptor`] is what callers hand to the registry: the
//! relation kind, the related table, and how the keys line up. The
//! registry turns it into a [`ResolvedRelation`], the flattened shape the
//! rest of the crate works with.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The four association shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Foreign key lives on the declaring table and points at the related
    /// table's primary key.
    BelongsTo,
    /// At most one related row carries a foreign key back to the declaring
    /// table.
    HasOne,
    /// Any number of related rows carry a foreign key back to the declaring
    /// table.
    HasMany,
    /// Rows are linked through a dedicated join table.
    HasAndBelongsToMany,
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }

    /// True for kinds that resolve to at most one related row.
    pub const fn is_to_one(self) -> bool {
        matches!(self, Self::BelongsTo | Self::HasOne)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column layout of a join table backing a [`RelationKind::HasAndBelongsToMany`]
/// relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTableKeys {
    /// Name of the join table itself.
    pub join_table: String,
    /// Join-table column referencing the declaring table.
    pub foreign_key: String,
    /// Join-table column referencing the related table.
    pub association_foreign_key: String,
    /// Referenced column on the declaring table.
    pub primary_key: String,
    /// Referenced column on the related table.
    pub association_primary_key: String,
}

impl JoinTableKeys {
    pub fn new(join_table: impl Into<String>) -> Self {
        Self {
            join_table: join_table.into(),
            foreign_key: String::new(),
            association_foreign_key: String::new(),
            primary_key: "id".to_string(),
            association_primary_key: "id".to_string(),
        }
    }

    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = column.into();
        self
    }

    #[must_use]
    pub fn association_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.association_foreign_key = column.into();
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    #[must_use]
    pub fn association_primary_key(mut self, column: impl Into<String>) -> Self {
        self.association_primary_key = column.into();
        self
    }
}

/// How a relation's key columns are specified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKeys {
    /// Explicit column lists: `columns` on the declaring table paired
    /// positionally with `references` on the related table.
    Direct {
        columns: Vec<String>,
        references: Vec<String>,
    },
    /// The conventional single-column form. For `belongs_to` the foreign
    /// key sits on the declaring table; for `has_one`/`has_many` it sits
    /// on the related table.
    Named {
        primary_key: String,
        foreign_key: String,
    },
    /// Derived relation: follow `through` on the declaring table, then
    /// `source` on whatever table that lands on.
    Through { through: String, source: String },
    /// Join-table layout for many-to-many relations.
    Join(JoinTableKeys),
}

/// Unresolved relation definition as supplied to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub related_table: String,
    pub keys: RelationKeys,
    pub required: bool,
}

impl RelationDescriptor {
    pub fn belongs_to(related_table: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, related_table)
    }

    pub fn has_one(related_table: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, related_table)
    }

    pub fn has_many(related_table: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, related_table)
    }

    pub fn has_and_belongs_to_many(related_table: impl Into<String>) -> Self {
        Self::new(RelationKind::HasAndBelongsToMany, related_table)
    }

    fn new(kind: RelationKind, related_table: impl Into<String>) -> Self {
        Self {
            kind,
            related_table: related_table.into(),
            keys: RelationKeys::Named {
                primary_key: "id".to_string(),
                foreign_key: String::new(),
            },
            required: false,
        }
    }

    /// Conventional key pair: referenced primary key plus foreign key column.
    #[must_use]
    pub fn keys(mut self, primary_key: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.keys = RelationKeys::Named {
            primary_key: primary_key.into(),
            foreign_key: foreign_key.into(),
        };
        self
    }

    /// Explicit multi-column key lists, paired positionally.
    #[must_use]
    pub fn columns(mut self, columns: &[&str], references: &[&str]) -> Self {
        self.keys = RelationKeys::Direct {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            references: references.iter().map(|c| (*c).to_string()).collect(),
        };
        self
    }

    /// Derive this relation by chaining `through` then `source`.
    #[must_use]
    pub fn through(mut self, through: impl Into<String>, source: impl Into<String>) -> Self {
        self.keys = RelationKeys::Through {
            through: through.into(),
            source: source.into(),
        };
        self
    }

    /// Join-table layout; only meaningful for `has_and_belongs_to_many`.
    #[must_use]
    pub fn join_table(mut self, keys: JoinTableKeys) -> Self {
        self.keys = RelationKeys::Join(keys);
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One matched column pair of a resolved relation.
///
/// `owner` is a column on the declaring table, `related` the column it
/// pairs with on the related table. For `belongs_to` the owner side is the
/// foreign key; for `has_one`/`has_many` it is the referenced key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub owner: String,
    pub related: String,
}

/// Fully resolved relation, ready for query building and mutation planning.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    /// Declaring table.
    pub table: String,
    /// Relation name on the declaring table.
    pub name: String,
    pub kind: RelationKind,
    /// Final related table. For derived relations this is the table the
    /// last hop lands on.
    pub related_table: String,
    /// Column pairings between declaring and related table. Empty for
    /// join-table and derived relations.
    pub key_pairs: Vec<KeyPair>,
    /// Join-table layout, set only for `has_and_belongs_to_many`.
    pub join: Option<JoinTableKeys>,
    /// Flattened hop chain for derived relations; empty otherwise.
    pub hops: Vec<Arc<ResolvedRelation>>,
    pub required: bool,
}

impl ResolvedRelation {
    /// Derived relations are read-only: they cannot be the target of
    /// nested writes.
    pub fn is_through(&self) -> bool {
        !self.hops.is_empty()
    }

    /// Columns of the declaring table that participate in the key pairing.
    pub fn owner_columns(&self) -> impl Iterator<Item = &str> {
        self.key_pairs.iter().map(|p| p.owner.as_str())
    }

    /// Columns of the related table that participate in the key pairing.
    pub fn related_columns(&self) -> impl Iterator<Item = &str> {
        self.key_pairs.iter().map(|p| p.related.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_as_str() {
        assert_eq!(RelationKind::BelongsTo.as_str(), "belongs_to");
        assert_eq!(RelationKind::HasAndBelongsToMany.as_str(), "has_and_belongs_to_many");
        assert!(RelationKind::HasOne.is_to_one());
        assert!(!RelationKind::HasMany.is_to_one());
    }

    #[test]
    fn descriptor_builders() {
        let d = RelationDescriptor::belongs_to("users").keys("id", "author_id").required();
        assert_eq!(d.kind, RelationKind::BelongsTo);
        assert_eq!(d.related_table, "users");
        assert!(d.required);
        assert_eq!(
            d.keys,
            RelationKeys::Named {
                primary_key: "id".to_string(),
                foreign_key: "author_id".to_string(),
            }
        );

        let d = RelationDescriptor::has_many("tags").through("post_tags", "tag");
        assert_eq!(
            d.keys,
            RelationKeys::Through {
                through: "post_tags".to_string(),
                source: "tag".to_string(),
            }
        );
    }

    #[test]
    fn join_table_builder() {
        let keys = JoinTableKeys::new("posts_tags")
            .foreign_key("post_id")
            .association_foreign_key("tag_id");
        assert_eq!(keys.join_table, "posts_tags");
        assert_eq!(keys.primary_key, "id");
        assert_eq!(keys.association_primary_key, "id");
        assert_eq!(keys.foreign_key, "post_id");
    }
}
