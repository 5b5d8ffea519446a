//! Webhook HTTP server handlers
//!
//! Implements the mutating (defaulting) and validating admission endpoints for
//! Cluster resources. Both delegate to the stage registry.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::controller::registry::Registry;
use crate::controller::validation::summarize;
use crate::crd::Cluster;

/// Kubernetes AdmissionReview request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    /// Base64-encoded JSON Patch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared state for webhook handlers
pub struct WebhookState {
    pub registry: Arc<Registry>,
}

impl WebhookState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate-cluster", post(mutate_cluster))
        .route("/validate-cluster", post(validate_cluster))
        .with_state(state)
}

fn missing_request() -> (StatusCode, Json<AdmissionReviewResponse>) {
    error!("Admission review missing request");
    (
        StatusCode::BAD_REQUEST,
        Json(review_response(deny(
            "",
            "Missing request in AdmissionReview",
            None,
        ))),
    )
}

/// Defaulting admission webhook handler
pub(crate) async fn mutate_cluster(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let Some(request) = review.request else {
        return missing_request();
    };
    (
        StatusCode::OK,
        Json(review_response(default_cluster(&state.registry, &request))),
    )
}

/// Validating admission webhook handler
pub(crate) async fn validate_cluster(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let Some(request) = review.request else {
        return missing_request();
    };
    (
        StatusCode::OK,
        Json(review_response(admit_cluster(&state.registry, &request))),
    )
}

fn parse_cluster(value: &serde_json::Value) -> Result<Cluster, serde_json::Error> {
    serde_json::from_value(value.clone())
}

/// Apply registry defaults; the patch replaces `/spec` when anything changed
pub fn default_cluster(registry: &Registry, request: &AdmissionRequest) -> AdmissionResponse {
    let uid = request.uid.as_str();
    info!(
        uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing defaulting request"
    );

    if request.operation != "CREATE" {
        return allow(uid);
    }
    let Some(object) = &request.object else {
        return deny(uid, "Missing object in request", None);
    };
    let mut cluster = match parse_cluster(object) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to parse Cluster");
            return deny(uid, &format!("Failed to parse object: {}", e), None);
        }
    };

    let original = cluster.spec.clone();
    registry.apply_defaults(&mut cluster);
    if cluster.spec == original {
        return allow(uid);
    }

    let patch = json!([{ "op": "add", "path": "/spec", "value": cluster.spec }]);
    match serde_json::to_vec(&patch) {
        Ok(bytes) => {
            info!(uid, version = cluster.version(), "Defaults applied");
            AdmissionResponse {
                patch: Some(STANDARD.encode(bytes)),
                patch_type: Some("JSONPatch".to_string()),
                ..allow(uid)
            }
        }
        Err(e) => deny(uid, &format!("Failed to encode patch: {}", e), None),
    }
}

/// Run create or update validation; every field error is reported in one denial
pub fn admit_cluster(registry: &Registry, request: &AdmissionRequest) -> AdmissionResponse {
    let uid = request.uid.as_str();
    info!(
        uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing validation request"
    );

    let Some(object) = &request.object else {
        // DELETE operations may not have object
        if request.operation == "DELETE" {
            return allow(uid);
        }
        return deny(uid, "Missing object in request", None);
    };
    let cluster = match parse_cluster(object) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to parse Cluster");
            return deny(uid, &format!("Failed to parse object: {}", e), None);
        }
    };

    let errors = match (request.operation.as_str(), &request.old_object) {
        ("UPDATE", Some(old)) => match parse_cluster(old) {
            Ok(old) => registry.validate_update(&old, &cluster),
            Err(e) => {
                warn!(error = %e, "Failed to parse old Cluster, treating as CREATE");
                registry.validate_create(&cluster)
            }
        },
        ("CREATE", _) | ("UPDATE", None) => registry.validate_create(&cluster),
        _ => Vec::new(),
    };

    if errors.is_empty() {
        info!(uid, "Admission request allowed");
        return allow(uid);
    }
    let message = summarize(&errors);
    warn!(uid, errors = errors.len(), %message, "Admission request denied");
    deny(uid, &message, Some("Invalid"))
}

fn allow(uid: &str) -> AdmissionResponse {
    AdmissionResponse {
        uid: uid.to_string(),
        allowed: true,
        status: None,
        patch: None,
        patch_type: None,
    }
}

fn deny(uid: &str, message: &str, reason: Option<&str>) -> AdmissionResponse {
    AdmissionResponse {
        status: Some(AdmissionStatus {
            code: 403,
            message: message.to_string(),
            reason: reason.map(String::from),
        }),
        allowed: false,
        ..allow(uid)
    }
}

/// Wrap a response into an AdmissionReview
fn review_response(response: AdmissionResponse) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response,
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves the defaulting and validation endpoints.
/// TLS certificates are loaded from the paths specified (PEM format).
pub async fn run_webhook_server(
    registry: Arc<Registry>,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router(Arc::new(WebhookState::new(registry)));

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}
