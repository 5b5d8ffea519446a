//! Status and conditions management for Cluster resources
//!
//! This module provides utilities for managing Kubernetes-style conditions
//! and building the status subresource patch written at the end of a pass.

use chrono::Utc;
use serde_json::{Value, json};

use crate::crd::{ClusterStatus, Condition};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Every stage of the pipeline reports ready
    pub const READY: &str = "Ready";
    /// A stage is still being brought up
    pub const PROGRESSING: &str = "Progressing";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// The transition time only moves when the status flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        let status = if is_progressing {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::PROGRESSING, status, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Record the outcome of a stage walk on the status.
///
/// `pending_stage` is the first stage that did not report ready, or `None`
/// once the whole pipeline is up.
pub fn record_progress(
    status: &mut ClusterStatus,
    generation: Option<i64>,
    pending_stage: Option<&str>,
) {
    let builder = ConditionBuilder::from_existing(std::mem::take(&mut status.conditions), generation);
    status.conditions = match pending_stage {
        Some(stage) => {
            let message = format!("Waiting for stage {} to become ready", stage);
            builder
                .ready(false, "StagePending", &message)
                .progressing(true, "StageInProgress", &message)
                .build()
        }
        None => builder
            .ready(true, "AllStagesReady", "All control-plane stages are ready")
            .progressing(false, "Stable", "Control plane is stable")
            .build(),
    };
    status.current_stage = pending_stage.unwrap_or_default().to_string();
    status.observed_generation = generation;
}

/// Merge patch body for the status subresource
///
/// An empty `currentStage` is sent as null so the merge clears the old value.
pub fn status_patch(status: &ClusterStatus, resource_version: Option<&str>) -> Value {
    let mut patch = json!({ "status": status });
    if status.current_stage.is_empty() {
        patch["status"]["currentStage"] = Value::Null;
    }
    if let Some(version) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    patch
}

/// Whether the status says every stage is ready
pub fn is_ready(status: Option<&ClusterStatus>) -> bool {
    status.is_some_and(|s| {
        s.conditions
            .iter()
            .any(|c| c.type_ == condition_types::READY && c.status == condition_status::TRUE)
    })
}
