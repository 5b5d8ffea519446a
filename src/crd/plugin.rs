use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ClusterPlugin runs an install and an uninstall Pod against one hosted cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.kok.io",
    version = "v1",
    kind = "ClusterPlugin",
    plural = "clusterplugins",
    shortname = "kcp",
    namespaced,
    status = "PluginStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Install", "type":"string", "jsonPath":".status.installStatus.phase"}"#,
    printcolumn = r#"{"name":"Uninstall", "type":"string", "jsonPath":".status.uninstallStatus.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPluginSpec {
    /// Name of the target Cluster in the plugin's namespace
    pub cluster_name: String,

    #[serde(default)]
    pub install: PluginPodSpec,

    #[serde(default)]
    pub uninstall: PluginPodSpec,
}

/// MultiClusterPlugin runs an install and an uninstall Pod against several hosted clusters
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.kok.io",
    version = "v1",
    kind = "MultiClusterPlugin",
    plural = "multiclusterplugins",
    shortname = "kmcp",
    namespaced,
    status = "PluginStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Install", "type":"string", "jsonPath":".status.installStatus.phase"}"#,
    printcolumn = r#"{"name":"Uninstall", "type":"string", "jsonPath":".status.uninstallStatus.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterPluginSpec {
    /// Names of the target Clusters in the plugin's namespace
    pub cluster_names: Vec<String>,

    #[serde(default)]
    pub install: PluginPodSpec,

    #[serde(default)]
    pub uninstall: PluginPodSpec,
}

/// Partial pod specification supplied by the user.
///
/// Converted into a full Pod spec with an allowlisted subset of container
/// fields; credential volumes are appended by the operator.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginPodSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
}

impl PluginPodSpec {
    /// A template without containers has nothing to run
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    #[serde(default)]
    pub install_status: PluginPodStatus,

    #[serde(default)]
    pub uninstall_status: PluginPodStatus,
}

/// Observed state of one phase Pod
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginPodStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    /// Pod phase (Pending, Running, Succeeded, Failed, Unknown)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Set once the Pod has succeeded
    #[serde(default)]
    pub ready: bool,
}

impl PluginPodStatus {
    /// The Pod has left Pending and Running
    pub fn is_terminal(&self) -> bool {
        !self.phase.is_empty() && self.phase != "Pending" && self.phase != "Running"
    }
}
