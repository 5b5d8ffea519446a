//! Common utilities for Kubernetes resource generation
//!
//! This module provides shared functions and constants used across
//! all resource generators to ensure consistency and reduce duplication.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use k8s_openapi::api::core::v1::{SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};

use crate::controller::store::FIELD_MANAGER;
use crate::crd::Cluster;

/// Label carrying the owning Cluster name on every child object
pub const CLUSTER_LABEL: &str = "cluster";

/// Label carrying the child object name; together with [`CLUSTER_LABEL`] it forms the selector
pub const APP_LABEL: &str = "app";

/// Longest label value, and longest DNS-1123 label, the API server accepts
pub const MAX_LABEL_LEN: usize = 63;

/// Hex digits of the SHA-256 suffix used by [`bounded_name`]
const NAME_HASH_LEN: usize = 8;

/// `value` unchanged when it fits in `max` bytes. Longer values keep a prefix
/// and end in `-<hash>` of the whole value, so distinct inputs stay distinct
/// and the result still starts and ends alphanumeric.
pub fn bounded_name(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    let hash: String = digest.chars().take(NAME_HASH_LEN.min(max)).collect();
    let prefix: String = value
        .chars()
        .take(max.saturating_sub(NAME_HASH_LEN + 1))
        .collect();
    let prefix = prefix.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    if prefix.is_empty() {
        hash
    } else {
        format!("{}-{}", prefix, hash)
    }
}

/// A Cluster name (or several joined) as a valid label value
pub fn label_value(value: &str) -> String {
    bounded_name(value, MAX_LABEL_LEN)
}

/// Generate a controller owner reference to `owner`
///
/// This ensures that child resources are garbage collected when the owner
/// is deleted.
pub fn owner_reference<K>(owner: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels selecting the pods of one child workload
pub fn selector_labels(cluster_name: &str, app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), label_value(cluster_name)),
        (APP_LABEL.to_string(), label_value(app)),
    ])
}

/// Labels for all resources belonging to a Cluster
pub fn standard_labels(cluster_name: &str, app: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(cluster_name, app);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        label_value(cluster_name),
    );
    labels
}

pub fn label_selector(cluster_name: &str, app: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(cluster_name, app)),
        ..Default::default()
    }
}

/// Deterministic child object name: `<cluster>-<component>`
pub fn child_name(cluster: &Cluster, component: &str) -> String {
    format!("{}-{}", cluster.name_any(), component)
}

/// Names of the objects produced for (or by) a Cluster.
///
/// Everything is derived from the Cluster name so that two Clusters in the
/// same namespace never collide.
pub mod names {
    use super::child_name;
    use crate::crd::Cluster;

    pub fn admin_account(c: &Cluster) -> String {
        child_name(c, "admin")
    }
    pub fn init_job(c: &Cluster) -> String {
        child_name(c, "init")
    }
    pub fn etcd(c: &Cluster) -> String {
        child_name(c, "etcd")
    }
    pub fn etcd_client_service(c: &Cluster) -> String {
        child_name(c, "etcd-client")
    }
    pub fn apiserver(c: &Cluster) -> String {
        child_name(c, "apiserver")
    }
    pub fn controller_manager(c: &Cluster) -> String {
        child_name(c, "controller-manager")
    }
    pub fn scheduler(c: &Cluster) -> String {
        child_name(c, "scheduler")
    }
    pub fn client(c: &Cluster) -> String {
        child_name(c, "client")
    }
    pub fn install_post_job(c: &Cluster) -> String {
        child_name(c, "install-post")
    }

    // Secrets written by the init Job, not by the operator
    pub fn ca_pki(c: &Cluster) -> String {
        child_name(c, "ca-pki")
    }
    pub fn etcd_pki_client(c: &Cluster) -> String {
        child_name(c, "etcd-pki-client")
    }
    pub fn etcd_pki_server(c: &Cluster) -> String {
        child_name(c, "etcd-pki-server")
    }
    pub fn etcd_pki_peer(c: &Cluster) -> String {
        child_name(c, "etcd-pki-peer")
    }
    pub fn k8s_server(c: &Cluster) -> String {
        child_name(c, "k8s-server")
    }
    pub fn k8s_client(c: &Cluster) -> String {
        child_name(c, "k8s-client")
    }
    pub fn node_config(c: &Cluster) -> String {
        child_name(c, "node-config")
    }
    pub fn admin_config(c: &Cluster) -> String {
        child_name(c, "admin-config")
    }

    /// Admin kubeconfig secret name for a Cluster known only by name
    pub fn admin_config_for(cluster_name: &str) -> String {
        format!("{}-admin-config", cluster_name)
    }
}

/// Parse `a.b.c.d/n` into its address and prefix length
pub fn parse_ipv4_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((addr, prefix))
}

/// Address `step` positions after the base address of `cidr`
///
/// Used to derive the kubernetes Service IP (step 1) and the cluster DNS
/// address (step 2) from the service range. Returns an empty string for an
/// unparsable range so that renders stay total.
pub fn next_ip_in_range(cidr: &str, step: u32) -> String {
    match parse_ipv4_cidr(cidr) {
        Some((addr, _)) => Ipv4Addr::from(u32::from(addr).wrapping_add(step)).to_string(),
        None => String::new(),
    }
}

/// Volume backed by a Secret
pub fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn read_only_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// PKI volumes shared by the control-plane workloads, keyed by volume name
pub fn pki_volumes(cluster: &Cluster) -> Vec<Volume> {
    let init = cluster
        .status
        .as_ref()
        .map(|s| s.init.clone())
        .unwrap_or_default();
    vec![
        secret_volume("ca-pki", &init.ca_pki_name),
        secret_volume("etcd-pki", &init.etcd_pki_client_name),
        secret_volume("k8s-server", &init.server_name),
        secret_volume("k8s-client", &init.client_name),
        secret_volume("nodeconfig", &init.node_config_name),
        secret_volume("adminconfig", &init.admin_config_name),
        secret_volume("k8s-config", &init.admin_config_name),
    ]
}

/// Pick the named volumes out of [`pki_volumes`], preserving the requested order
pub fn select_volumes(cluster: &Cluster, names: &[&str]) -> Vec<Volume> {
    let all = pki_volumes(cluster);
    names
        .iter()
        .filter_map(|n| all.iter().find(|v| v.name == *n).cloned())
        .collect()
}

/// Standard mount point of each PKI volume
pub fn pki_mount(name: &str) -> VolumeMount {
    let path = match name {
        "ca-pki" => "/pki/ca",
        "etcd-pki" => "/pki/etcd",
        "k8s-server" => "/pki/server",
        "k8s-client" => "/pki/client",
        "k8s-config" => "/pki/config",
        "nodeconfig" => "/home/node",
        "adminconfig" => "/home/admin",
        other => return read_only_mount(other, &format!("/pki/{}", other)),
    };
    read_only_mount(name, path)
}
