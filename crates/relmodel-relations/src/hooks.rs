//! Mutation planning.
//!
//! Before any statement is issued, the nested payloads of a call are
//! validated against the relation map and sorted into phases: `belongs_to`
//! work runs before the primary statement (it produces the foreign keys
//! the primary rows carry), everything else runs after it (it needs the
//! primary rows' keys). Validation failures surface here, so an illegal
//! payload performs zero writes.

use std::sync::Arc;

use relmodel_core::{Error, RelationConfigError, Result};

use crate::descriptor::{RelationKind, ResolvedRelation};
use crate::payload::{check_allowed, MutationContext, MutationRow, NestedOp, Record};
use crate::registry::RelationMap;

/// Ops for one relation, tagged with the payload row each came from.
#[derive(Debug)]
pub struct ScheduledAction {
    pub relation: Arc<ResolvedRelation>,
    pub items: Vec<(usize, NestedOp)>,
}

/// The nested work of one mutation call, split around the primary
/// statement.
#[derive(Debug, Default)]
pub struct MutationPlan {
    pub before: Vec<ScheduledAction>,
    pub after: Vec<ScheduledAction>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// More than the single primary statement implies a transaction.
    pub fn requires_transaction(&self) -> bool {
        !self.is_empty()
    }
}

/// Validate and split a create payload. Returns the bare records for the
/// primary INSERT alongside the plan.
pub fn plan_create(
    map: &RelationMap,
    table: &str,
    rows: Vec<MutationRow>,
) -> Result<(Vec<Record>, MutationPlan)> {
    let mut plan = MutationPlan::default();
    let mut records = Vec::with_capacity(rows.len());

    for (idx, row) in rows.into_iter().enumerate() {
        for (name, op) in row.nested {
            let rel = map.get(table, &name)?;
            check_allowed(rel, &op, MutationContext::Create)?;
            if op.is_noop() {
                continue;
            }
            schedule(&mut plan, rel, idx, op);
        }
        records.push(row.values);
    }

    check_required(map, table, &records, &plan)?;
    Ok((records, plan))
}

/// Validate and split an update patch. `ctx` distinguishes the
/// exactly-one-row call from the batch call; batch-illegal ops fail here.
pub fn plan_update(
    map: &RelationMap,
    table: &str,
    patch: MutationRow,
    ctx: MutationContext,
) -> Result<(Record, MutationPlan)> {
    debug_assert!(ctx != MutationContext::Create);
    let mut plan = MutationPlan::default();
    for (name, op) in patch.nested {
        let rel = map.get(table, &name)?;
        check_allowed(rel, &op, ctx)?;
        if op.is_noop() {
            continue;
        }
        schedule(&mut plan, rel, 0, op);
    }
    Ok((patch.values, plan))
}

fn schedule(plan: &mut MutationPlan, rel: &Arc<ResolvedRelation>, idx: usize, op: NestedOp) {
    let phase = if rel.kind == RelationKind::BelongsTo {
        &mut plan.before
    } else {
        &mut plan.after
    };
    if let Some(action) = phase.iter_mut().find(|a| Arc::ptr_eq(&a.relation, rel)) {
        action.items.push((idx, op));
    } else {
        phase.push(ScheduledAction {
            relation: Arc::clone(rel),
            items: vec![(idx, op)],
        });
    }
}

/// A required `belongs_to` must be satisfied on create, either by a key
/// value in the record or by a nested payload for the relation.
fn check_required(
    map: &RelationMap,
    table: &str,
    records: &[Record],
    plan: &MutationPlan,
) -> Result<()> {
    for rel in map.relations_of(table) {
        if !(rel.required && rel.kind == RelationKind::BelongsTo) {
            continue;
        }
        let planned: Vec<usize> = plan
            .before
            .iter()
            .filter(|a| Arc::ptr_eq(&a.relation, rel))
            .flat_map(|a| a.items.iter().map(|(idx, _)| *idx))
            .collect();
        for (idx, record) in records.iter().enumerate() {
            let has_keys = rel.owner_columns().all(|c| record.contains(c));
            if !has_keys && !planned.contains(&idx) {
                return Err(Error::RelationConfig(RelationConfigError {
                    table: table.to_string(),
                    relation: rel.name.clone(),
                    message: "required relation missing from create payload".to_string(),
                }));
            }
        }
    }
    Ok(())
}
