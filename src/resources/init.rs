//! Bootstrap objects: the admin ServiceAccount, its RoleBinding and the init Job
//!
//! The init Job runs an opaque script that generates every PKI and kubeconfig
//! secret the control plane mounts later. Secret names are handed to the
//! script through environment variables and read back into status from the
//! observed Job, so the rest of the pipeline never derives them itself.

use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, ServiceAccount};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{Cluster, InitStatus};
use crate::resources::common::{names, next_ip_in_range, owner_reference, standard_labels};

fn metadata(cluster: &Cluster, name: String) -> ObjectMeta {
    ObjectMeta {
        labels: Some(standard_labels(&cluster.name_any(), &name)),
        name: Some(name),
        namespace: cluster.namespace(),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}

/// ServiceAccount the init Job runs as
pub fn generate_service_account(cluster: &Cluster) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(cluster, names::admin_account(cluster)),
        ..Default::default()
    }
}

/// Binds the admin ServiceAccount to `cluster-admin` within the namespace
pub fn generate_role_binding(cluster: &Cluster) -> RoleBinding {
    let account = names::admin_account(cluster);
    RoleBinding {
        metadata: metadata(cluster, account.clone()),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: account,
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "cluster-admin".to_string(),
        },
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Init Job generating the PKI and kubeconfig secrets
pub fn generate_init_job(cluster: &Cluster) -> Job {
    let name = names::init_job(cluster);
    let apiserver = names::apiserver(cluster);
    let spec = &cluster.spec;

    let env_vars = vec![
        env("APISERVER_ADDRESS", apiserver.clone()),
        env("FRONT_APISERVER_ADDRESS", apiserver),
        env("FRONT_APISERVER_PORT", spec.access.port.clone()),
        env(
            "KUBE_SVC_ADDR",
            next_ip_in_range(&spec.service_cluster_ip_range, 1),
        ),
        env("CA_PKI_NAME", names::ca_pki(cluster)),
        env("ETCD_SVC_NAME", names::etcd(cluster)),
        env("ETCD_SVC_CLIENT_NAME", names::etcd_client_service(cluster)),
        env("ETCD_PKI_PEER_NAME", names::etcd_pki_peer(cluster)),
        env("ETCD_PKI_SERVER_NAME", names::etcd_pki_server(cluster)),
        env("ETCD_PKI_CLIENT_NAME", names::etcd_pki_client(cluster)),
        env("K8S_SERVER_NAME", names::k8s_server(cluster)),
        env("K8S_CLIENT_NAME", names::k8s_client(cluster)),
        env("ADMIN_CONFIG_NAME", names::admin_config(cluster)),
        env("NODE_CONFIG_NAME", names::node_config(cluster)),
        env("CLUSTER_DOMAIN", spec.cluster_domain.clone()),
    ];

    let meta = metadata(cluster, name.clone());
    Job {
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name),
                    labels: meta.labels.clone(),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "init".to_string(),
                        image: Some(spec.init.image.clone()),
                        command: Some(vec!["sh".to_string(), "/home/init.sh".to_string()]),
                        env: Some(env_vars),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(names::admin_account(cluster)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        metadata: meta,
        ..Default::default()
    }
}

/// Copy the secret names handed to the init script into status
pub fn record_secret_names(status: &mut InitStatus, job: &Job) {
    let envs = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.env.as_ref());

    for var in envs.into_iter().flatten() {
        let Some(value) = var.value.clone() else {
            continue;
        };
        let slot = match var.name.as_str() {
            "CA_PKI_NAME" => &mut status.ca_pki_name,
            "ETCD_PKI_PEER_NAME" => &mut status.etcd_pki_peer_name,
            "ETCD_PKI_SERVER_NAME" => &mut status.etcd_pki_server_name,
            "ETCD_PKI_CLIENT_NAME" => &mut status.etcd_pki_client_name,
            "K8S_SERVER_NAME" => &mut status.server_name,
            "K8S_CLIENT_NAME" => &mut status.client_name,
            "ADMIN_CONFIG_NAME" => &mut status.admin_config_name,
            "NODE_CONFIG_NAME" => &mut status.node_config_name,
            _ => continue,
        };
        *slot = value;
    }
}

/// Names of the secrets written by the init Job; they carry no owner reference
pub fn generated_secret_names(cluster: &Cluster) -> Vec<String> {
    vec![
        names::ca_pki(cluster),
        names::etcd_pki_client(cluster),
        names::etcd_pki_server(cluster),
        names::etcd_pki_peer(cluster),
        names::k8s_server(cluster),
        names::k8s_client(cluster),
        names::node_config(cluster),
        names::admin_config(cluster),
    ]
}

/// Whether the init Job has a `Complete` condition
pub fn job_complete(status: Option<&JobStatus>) -> bool {
    status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Complete" && c.status == "True")
        })
}
