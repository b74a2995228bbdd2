#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use compliance_kernel_contracts::run::{Condition, ConditionStatus, ConditionType};

pub const UNSPECIFIED_REASON: &str = "Unspecified";
pub const NO_MESSAGE_GIVEN: &str = "No message given.";

/// Desired fields for one condition type. `None` and empty strings keep the prior value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub status: Option<ConditionStatus>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ConditionUpdate {
    pub fn v1(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: Some(status),
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }
}

/// Builds the next value of a condition from its prior value.
///
/// `lastTransitionTime` moves only when the status changes, `lastUpdateTime` only when
/// reason or message change. The returned flag is true when the result differs from
/// `prior` (always true when there is no prior).
pub fn build_condition(
    prior: Option<&Condition>,
    condition_type: &ConditionType,
    update: &ConditionUpdate,
    now: DateTime<Utc>,
) -> (Condition, bool) {
    let status = update
        .status
        .or(prior.map(|p| p.status))
        .unwrap_or(ConditionStatus::Unknown);
    let reason = first_non_empty(
        update.reason.as_deref(),
        prior.map(|p| p.reason.as_str()),
        UNSPECIFIED_REASON,
    );
    let message = first_non_empty(
        update.message.as_deref(),
        prior.map(|p| p.message.as_str()),
        NO_MESSAGE_GIVEN,
    );

    let Some(prior) = prior else {
        let created = Condition {
            condition_type: condition_type.clone(),
            status,
            last_update_time: now,
            last_transition_time: now,
            reason,
            message,
        };
        return (created, true);
    };

    let last_transition_time = if status != prior.status {
        now
    } else {
        prior.last_transition_time
    };
    let last_update_time = if reason != prior.reason || message != prior.message {
        now
    } else {
        prior.last_update_time
    };

    let next = Condition {
        condition_type: condition_type.clone(),
        status,
        last_update_time,
        last_transition_time,
        reason,
        message,
    };
    let changed = &next != prior;
    (next, changed)
}

/// Updates the entry for `condition_type` in place, appending it when absent.
pub fn update_conditions(
    conditions: &mut Vec<Condition>,
    condition_type: &ConditionType,
    update: &ConditionUpdate,
    now: DateTime<Utc>,
) -> bool {
    match conditions
        .iter()
        .position(|c| &c.condition_type == condition_type)
    {
        Some(idx) => {
            let (next, changed) =
                build_condition(Some(&conditions[idx]), condition_type, update, now);
            conditions[idx] = next;
            changed
        }
        None => {
            let (created, changed) = build_condition(None, condition_type, update, now);
            conditions.push(created);
            changed
        }
    }
}

/// Drops every entry of `condition_type`. Returns whether anything was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &ConditionType) -> bool {
    let before = conditions.len();
    conditions.retain(|c| &c.condition_type != condition_type);
    conditions.len() != before
}

fn first_non_empty(update: Option<&str>, prior: Option<&str>, fallback: &str) -> String {
    update
        .filter(|v| !v.is_empty())
        .or(prior.filter(|v| !v.is_empty()))
        .unwrap_or(fallback)
        .to_string()
}
