//! Client tooling: an idle Deployment with every credential mounted, plus the
//! post-install Job that grants hosted nodes their cluster role

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Cluster;
use crate::resources::common::{
    names, owner_reference, pki_mount, select_volumes, standard_labels,
};
use crate::resources::deployment::generate_deployment;

const VOLUMES: [&str; 6] = [
    "ca-pki",
    "etcd-pki",
    "k8s-server",
    "k8s-client",
    "nodeconfig",
    "adminconfig",
];

/// Generate the client Deployment; the container idles on `cat` for `kubectl exec`
pub fn generate_client_deployment(cluster: &Cluster) -> Deployment {
    let container = Container {
        name: "client".to_string(),
        image: Some(cluster.spec.client.image.clone()),
        command: Some(vec!["cat".to_string()]),
        stdin: Some(true),
        volume_mounts: Some(VOLUMES.iter().map(|v| pki_mount(v)).collect()),
        ..Default::default()
    };

    generate_deployment(
        cluster,
        &names::client(cluster),
        1,
        PodSpec {
            termination_grace_period_seconds: Some(1),
            containers: vec![container],
            volumes: Some(select_volumes(cluster, &VOLUMES)),
            ..Default::default()
        },
    )
}

/// Generate the Job binding `system:node` to `cluster-admin` inside the hosted cluster
pub fn generate_install_post_job(cluster: &Cluster) -> Job {
    let name = names::install_post_job(cluster);
    let labels = standard_labels(&cluster.name_any(), &name);

    let container = Container {
        name: "install-post".to_string(),
        image: Some(cluster.spec.init.image.clone()),
        working_dir: Some("/home".to_string()),
        command: Some(
            [
                "kubectl",
                "--kubeconfig=admin/admin.config",
                "create",
                "clusterrolebinding",
                "cluster-node",
                "--clusterrole=cluster-admin",
                "--user=kubernetes-node",
                "--group=system:node",
            ]
            .map(String::from)
            .to_vec(),
        ),
        volume_mounts: Some(VOLUMES.iter().map(|v| pki_mount(v)).collect()),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(select_volumes(cluster, &VOLUMES)),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
