use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::batch::v1::JobStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::EtcdClusterStatus;

/// Cluster describes a Kubernetes control plane hosted as workloads in this cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.kok.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "kc",
    namespaced,
    status = "ClusterStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.clusterVersion"}"#,
    printcolumn = r#"{"name":"Stage", "type":"string", "jsonPath":".status.currentStage"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// DNS domain of the hosted cluster (e.g., "cluster.local")
    #[serde(default)]
    pub cluster_domain: String,

    /// Control-plane variant key (e.g., "x86-1.18.4"); selects the stage pipeline
    #[serde(default)]
    pub cluster_version: String,

    /// Pod CIDR of the hosted cluster
    #[serde(default, rename = "clusterCidr")]
    pub cluster_cidr: String,

    /// Service CIDR of the hosted cluster
    #[serde(default)]
    pub service_cluster_ip_range: String,

    /// Registry mirrors handed to hosted nodes
    #[serde(default)]
    pub registry_mirrors: Vec<String>,

    /// External access endpoint of the hosted API server
    #[serde(default)]
    pub access: AccessSpec,

    #[serde(default)]
    pub init: ImageSpec,

    #[serde(default)]
    pub etcd: EtcdSpec,

    #[serde(default)]
    pub api_server: ComponentSpec,

    #[serde(default)]
    pub controller_manager: ComponentSpec,

    #[serde(default)]
    pub scheduler: ComponentSpec,

    #[serde(default)]
    pub client: ImageSpec,

    #[serde(default)]
    pub kubelet: KubeletSpec,

    #[serde(default)]
    pub kube_proxy: KubeProxySpec,
}

/// Address and port at which the hosted API server is reachable
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AccessSpec {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: String,
}

/// A component that only carries an image
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ImageSpec {
    #[serde(default)]
    pub image: String,
}

/// etcd sizing
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct EtcdSpec {
    /// Number of etcd members; must be odd and at least 3
    #[serde(default)]
    pub count: i32,
}

/// A replicated control-plane component (API server, controller-manager, scheduler)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ComponentSpec {
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeletSpec {
    #[serde(default)]
    pub pod_infra_container_image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxySpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bind_address: String,
}

/// Observed state of a hosted control plane, written only by the operator
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Generation of the spec last walked by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// First stage that has not reported ready; empty once every stage is ready
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_stage: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub init: InitStatus,

    #[serde(default)]
    pub etcd: EtcdStatus,

    #[serde(default)]
    pub api_server: ApiServerStatus,

    #[serde(default)]
    pub controller_manager: DeploymentComponentStatus,

    #[serde(default)]
    pub scheduler: DeploymentComponentStatus,

    #[serde(default)]
    pub client: DeploymentComponentStatus,

    #[serde(default)]
    pub post_install: JobComponentStatus,
}

/// Names published by the bootstrap stage, plus the init Job snapshot
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_pki_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_config_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_config_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_binding_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etcd_pki_peer_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etcd_pki_server_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etcd_pki_client_name: String,
    /// Cluster DNS address (second address of the service range)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub svc_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EtcdClusterStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub svc_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentComponentStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct JobComponentStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Cluster {
    /// The stage pipeline key; empty until defaulting fills it in
    pub fn version(&self) -> &str {
        &self.spec.cluster_version
    }

    /// Whether the cluster has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
