//! # Apply Plan
//!
//! Pure diff between the desired set and what the owner applied before.

use super::object::{DesiredObject, ObjectKey};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// What the engine knows about an object already in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingObject {
    /// Hash stamped by the last apply, if any
    pub applied_hash: Option<String>,
    /// Carries this owner's set label, so it may be pruned
    pub owned: bool,
}

/// One store operation, in execution order
#[derive(Debug, Clone)]
pub enum ApplyStep {
    Create(DesiredObject),
    Update(DesiredObject),
    Delete(ObjectKey),
}

impl ApplyStep {
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            ApplyStep::Create(d) | ApplyStep::Update(d) => &d.key,
            ApplyStep::Delete(key) => key,
        }
    }

    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            ApplyStep::Create(_) => "create",
            ApplyStep::Update(_) => "update",
            ApplyStep::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Default)]
pub struct ApplyPlan {
    pub creates: Vec<DesiredObject>,
    pub updates: Vec<DesiredObject>,
    pub deletes: Vec<ObjectKey>,
    pub unchanged: Vec<ObjectKey>,
}

impl ApplyPlan {
    /// Diff `desired` (already stamped with its applied hash) against `existing`
    ///
    /// Later duplicates of a key replace earlier ones.
    #[must_use]
    pub fn compute(
        desired: Vec<DesiredObject>,
        existing: &BTreeMap<ObjectKey, ExistingObject>,
        applied_hash: impl Fn(&DesiredObject) -> Option<String>,
    ) -> Self {
        let desired: BTreeMap<ObjectKey, DesiredObject> =
            desired.into_iter().map(|d| (d.key.clone(), d)).collect();

        let mut plan = Self::default();
        for (key, object) in desired.iter() {
            match existing.get(key) {
                None => plan.creates.push(object.clone()),
                Some(current) if current.applied_hash.is_some() && current.applied_hash == applied_hash(object) => {
                    plan.unchanged.push(key.clone());
                }
                Some(_) => plan.updates.push(object.clone()),
            }
        }
        plan.deletes = existing
            .iter()
            .filter(|(key, current)| current.owned && !desired.contains_key(*key))
            .map(|(key, _)| key.clone())
            .collect();
        plan
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Creates and updates by ascending kind priority, then deletes by descending priority
    #[must_use]
    pub fn into_steps(self) -> Vec<ApplyStep> {
        let mut upserts: Vec<ApplyStep> = self
            .creates
            .into_iter()
            .map(ApplyStep::Create)
            .chain(self.updates.into_iter().map(ApplyStep::Update))
            .collect();
        upserts.sort_by(|a, b| {
            (a.key().kind.priority(), a.key()).cmp(&(b.key().kind.priority(), b.key()))
        });

        let mut deletes = self.deletes;
        deletes.sort_by_key(|key| (Reverse(key.kind.priority()), key.clone()));

        upserts
            .into_iter()
            .chain(deletes.into_iter().map(ApplyStep::Delete))
            .collect()
    }
}
