//! Client-side model of the etcd-operator `EtcdCluster` resource.
//!
//! Only the fields the etcd stage renders or reads are modelled; the
//! operator that owns this CRD is installed separately.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdCluster",
    plural = "etcdclusters",
    namespaced,
    status = "EtcdClusterStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Expected number of members
    pub size: i32,

    /// Image repository of the etcd member pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// etcd version of the member pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "TLS", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TlsPolicy {
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_tls: Option<StaticTls>,
}

/// Pre-generated TLS material referenced by secret name
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberSecret>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_secret: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberSecret {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peer_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_secret: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Current number of members
    #[serde(default)]
    pub size: i32,

    /// Service fronting the etcd client port
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    #[serde(default)]
    pub client_port: i32,

    #[serde(default)]
    pub members: MembersStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MembersStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unready: Vec<String>,
}
