//! kube-scheduler Deployment

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec};

use crate::crd::Cluster;
use crate::resources::common::{names, pki_mount, select_volumes};
use crate::resources::deployment::generate_deployment;

const VOLUMES: [&str; 3] = ["ca-pki", "k8s-server", "k8s-config"];

/// Generate the scheduler Deployment
pub fn generate_scheduler_deployment(cluster: &Cluster) -> Deployment {
    let container = Container {
        name: "scheduler".to_string(),
        image: Some(cluster.spec.scheduler.image.clone()),
        command: Some(
            [
                "kube-scheduler",
                "--kubeconfig=/pki/config/admin.config",
                "--authentication-kubeconfig=/pki/config/admin.config",
                "--authorization-kubeconfig=/pki/config/admin.config",
                "--leader-elect=true",
                "--requestheader-client-ca-file=/pki/ca/ca.pem",
            ]
            .map(String::from)
            .to_vec(),
        ),
        volume_mounts: Some(VOLUMES.iter().map(|v| pki_mount(v)).collect()),
        ..Default::default()
    };

    generate_deployment(
        cluster,
        &names::scheduler(cluster),
        cluster.spec.scheduler.count,
        PodSpec {
            containers: vec![container],
            volumes: Some(select_volumes(cluster, &VOLUMES)),
            ..Default::default()
        },
    )
}
