//! kube-controller-manager Deployment

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec};

use crate::crd::Cluster;
use crate::resources::common::{names, pki_mount, select_volumes};
use crate::resources::deployment::generate_deployment;

const VOLUMES: [&str; 3] = ["ca-pki", "k8s-server", "k8s-config"];

fn command(cluster: &Cluster) -> Vec<String> {
    vec![
        "kube-controller-manager".to_string(),
        "--allocate-node-cidrs=true".to_string(),
        "--authentication-kubeconfig=/pki/config/admin.config".to_string(),
        "--authorization-kubeconfig=/pki/config/admin.config".to_string(),
        "--bind-address=127.0.0.1".to_string(),
        "--client-ca-file=/pki/ca/ca.pem".to_string(),
        format!("--cluster-cidr={}", cluster.spec.cluster_cidr),
        "--cluster-signing-cert-file=/pki/ca/ca.pem".to_string(),
        "--cluster-signing-key-file=/pki/ca/ca-key.pem".to_string(),
        "--controllers=*,bootstrapsigner,tokencleaner".to_string(),
        "--kubeconfig=/pki/config/admin.config".to_string(),
        "--leader-elect=true".to_string(),
        "--node-cidr-mask-size=24".to_string(),
        "--requestheader-client-ca-file=/pki/ca/ca.pem".to_string(),
        "--root-ca-file=/pki/ca/ca.pem".to_string(),
        "--service-account-private-key-file=/pki/server/kubernetes-server-key.pem".to_string(),
        format!(
            "--service-cluster-ip-range={}",
            cluster.spec.service_cluster_ip_range
        ),
        "--use-service-account-credentials=true".to_string(),
    ]
}

/// Generate the controller-manager Deployment
pub fn generate_controller_manager_deployment(cluster: &Cluster) -> Deployment {
    let container = Container {
        name: "controller-manager".to_string(),
        image: Some(cluster.spec.controller_manager.image.clone()),
        command: Some(command(cluster)),
        volume_mounts: Some(VOLUMES.iter().map(|v| pki_mount(v)).collect()),
        ..Default::default()
    };

    generate_deployment(
        cluster,
        &names::controller_manager(cluster),
        cluster.spec.controller_manager.count,
        PodSpec {
            containers: vec![container],
            volumes: Some(select_volumes(cluster, &VOLUMES)),
            ..Default::default()
        },
    )
}
