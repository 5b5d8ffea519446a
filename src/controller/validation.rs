//! Field-level validation primitives shared by every stage's admission hooks
//!
//! Stages return lists of [`FieldError`]; the admission layer joins them into
//! one structured denial. Nothing here mutates the resource.

use std::fmt;

use serde::Serialize;

use crate::resources::common::parse_ipv4_cidr;

/// One rejected field: where, what value, and why
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// JSON path of the field (e.g., `spec.etcd.count`)
    pub path: String,
    /// Offending value rendered as text
    pub value: String,
    pub message: String,
}

impl FieldError {
    pub fn invalid(path: &str, value: impl ToString, message: &str) -> Self {
        Self {
            path: path.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        }
    }

    pub fn required(path: &str) -> Self {
        Self::invalid(path, "", "must not be empty")
    }

    pub fn immutable(path: &str, value: impl ToString) -> Self {
        Self::invalid(path, value, "field is immutable")
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Invalid value: {:?}: {}",
            self.path, self.value, self.message
        )
    }
}

/// Join a list of field errors into one admission message
pub fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Record an error when a string field is empty
pub fn require_non_empty(errors: &mut Vec<FieldError>, path: &str, value: &str) {
    if value.is_empty() {
        errors.push(FieldError::required(path));
    }
}

/// Record an error when a field changed between the old and new object
pub fn require_unchanged<T>(errors: &mut Vec<FieldError>, path: &str, new: &T, old: &T)
where
    T: PartialEq + fmt::Display + ?Sized,
{
    if new != old {
        errors.push(FieldError::immutable(path, new));
    }
}

/// Record an error when a field is not an IPv4 CIDR
pub fn require_ipv4_cidr(errors: &mut Vec<FieldError>, path: &str, value: &str) {
    if value.is_empty() {
        errors.push(FieldError::required(path));
    } else if parse_ipv4_cidr(value).is_none() {
        errors.push(FieldError::invalid(path, value, "must be an IPv4 CIDR"));
    }
}

/// Record an error when an etcd member count is even or below three
pub fn require_odd_quorum(errors: &mut Vec<FieldError>, path: &str, count: i32) {
    if count < 3 || count % 2 == 0 {
        errors.push(FieldError::invalid(path, count, "must be odd and at least 3"));
    }
}

/// Record an error when a replica count is below `min`
pub fn require_at_least(errors: &mut Vec<FieldError>, path: &str, count: i32, min: i32) {
    if count < min {
        errors.push(FieldError::invalid(
            path,
            count,
            &format!("must be at least {}", min),
        ));
    }
}
