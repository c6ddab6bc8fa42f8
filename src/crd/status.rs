//! # Status Conditions
//!
//! Condition bookkeeping shared by every source resource.

use serde::{Deserialize, Serialize};

/// A single status condition
///
/// `status` is the string form Kubernetes tooling expects: `"True"` or `"False"`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_update_time: Option<String>,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    /// Compare everything except the timestamps
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Desired state of one condition, before timestamps are filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub ok: bool,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn ready(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
            message: String::new(),
        }
    }

    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Status blocks that carry a list of conditions
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions()
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    /// Set `condition_type` to `update`
    ///
    /// `lastTransitionTime` only moves when the True/False value flips;
    /// `lastUpdateTime` only moves when anything other than timestamps changes.
    fn set_condition(&mut self, condition_type: &str, update: &ConditionUpdate, now: &str) {
        let status = if update.ok { "True" } else { "False" };
        let reason = (!update.reason.is_empty()).then(|| update.reason.clone());
        let message = (!update.message.is_empty()).then(|| update.message.clone());
        let conditions = self.conditions_mut();

        match conditions.iter_mut().find(|c| c.r#type == condition_type) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now.to_string());
                }
                if existing.status != status
                    || existing.reason != reason
                    || existing.message != message
                {
                    existing.last_update_time = Some(now.to_string());
                }
                existing.status = status.to_string();
                existing.reason = reason;
                existing.message = message;
            }
            None => conditions.push(Condition {
                r#type: condition_type.to_string(),
                status: status.to_string(),
                last_update_time: Some(now.to_string()),
                last_transition_time: Some(now.to_string()),
                reason,
                message,
            }),
        }
    }
}

/// Whether two condition lists differ in anything but timestamps
#[must_use]
pub fn conditions_changed(before: &[Condition], after: &[Condition]) -> bool {
    before.len() != after.len()
        || before
            .iter()
            .zip(after)
            .any(|(a, b)| !a.same_state(b))
}
