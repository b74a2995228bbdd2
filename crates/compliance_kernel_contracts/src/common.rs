#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContractViolation {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field} must be within {min}..={max}, got {got}")]
    InvalidRange {
        field: &'static str,
        min: u64,
        max: u64,
        got: u64,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// Caller-supplied bound on how long an external call may take.
///
/// `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

pub(crate) fn validate_non_empty(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    Ok(())
}

/// DNS-1123 subdomain: lowercase alphanumerics, '-' and '.', alphanumeric at both ends.
pub fn validate_object_name(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    validate_non_empty(field, value, 253)?;
    if value
        .chars()
        .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'))
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must contain lowercase alphanumerics, '-' or '.' only",
        });
    }
    if !starts_and_ends_alphanumeric(value) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must start and end with an alphanumeric character",
        });
    }
    Ok(())
}

pub fn validate_label_key(field: &'static str, key: &str) -> Result<(), ContractViolation> {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        validate_object_name(field, prefix)?;
    }
    if name.is_empty() || name.len() > 63 {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "label name must be 1..=63 characters",
        });
    }
    validate_label_chars(field, name)
}

pub fn validate_label_value(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "label value must be at most 63 characters",
        });
    }
    validate_label_chars(field, value)
}

fn validate_label_chars(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must contain alphanumerics, '-', '_' or '.' only",
        });
    }
    if !starts_and_ends_alphanumeric(value) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must start and end with an alphanumeric character",
        });
    }
    Ok(())
}

fn starts_and_ends_alphanumeric(value: &str) -> bool {
    let first = value.chars().next();
    let last = value.chars().last();
    matches!(
        (first, last),
        (Some(a), Some(b)) if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric()
    )
}
