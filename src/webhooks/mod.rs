//! Admission webhooks for Cluster defaulting and validation
//!
//! The mutating endpoint fills in registry defaults on create; the validating
//! endpoint rejects creates and updates the stage pipeline refuses, listing
//! every offending field.

mod server;

pub use server::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH,
    WEBHOOK_PORT, WebhookError, WebhookState, admit_cluster, create_webhook_router,
    default_cluster, run_webhook_server,
};
