//! kube-apiserver Deployment and its NodePort Service

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, Probe, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Cluster;
use crate::resources::common::{
    names, owner_reference, pki_mount, select_volumes, selector_labels, standard_labels,
};
use crate::resources::deployment::generate_deployment;

/// Secure port served by the hosted API server
pub const APISERVER_PORT: i32 = 6443;

const PORT_NAME: &str = "https-6443";

const VOLUMES: [&str; 4] = ["ca-pki", "etcd-pki", "k8s-server", "k8s-client"];

const ADMISSION_PLUGINS: &str = "NamespaceLifecycle,LimitRanger,ServiceAccount,TaintNodesByCondition,Priority,DefaultTolerationSeconds,DefaultStorageClass,StorageObjectInUseProtection,PersistentVolumeClaimResize,MutatingAdmissionWebhook,ValidatingAdmissionWebhook,RuntimeClass,ResourceQuota";

fn https_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(APISERVER_PORT),
            scheme: Some("HTTPS".to_string()),
            ..Default::default()
        }),
        timeout_seconds: Some(15),
        success_threshold: Some(1),
        ..Default::default()
    }
}

/// etcd client endpoint as published by the etcd stage
fn etcd_servers(cluster: &Cluster) -> String {
    let etcd = cluster
        .status
        .as_ref()
        .map(|s| s.etcd.clone())
        .unwrap_or_default();
    let port = etcd.status.map(|s| s.client_port).unwrap_or_default();
    format!("https://{}:{}", etcd.svc_name, port)
}

fn command(cluster: &Cluster) -> Vec<String> {
    vec![
        "kube-apiserver".to_string(),
        "--allow-privileged=true".to_string(),
        "--authorization-mode=Node,RBAC".to_string(),
        "--client-ca-file=/pki/ca/ca.pem".to_string(),
        format!("--enable-admission-plugins={}", ADMISSION_PLUGINS),
        "--etcd-cafile=/pki/ca/ca.pem".to_string(),
        "--etcd-certfile=/pki/etcd/etcd-client.crt".to_string(),
        "--etcd-keyfile=/pki/etcd/etcd-client.key".to_string(),
        format!("--etcd-servers={}", etcd_servers(cluster)),
        "--insecure-port=0".to_string(),
        "--kubelet-client-certificate=/pki/client/kubernetes-node.pem".to_string(),
        "--kubelet-client-key=/pki/client/kubernetes-node-key.pem".to_string(),
        "--kubelet-preferred-address-types=InternalIP,ExternalIP,Hostname".to_string(),
        format!("--secure-port={}", APISERVER_PORT),
        format!(
            "--service-cluster-ip-range={}",
            cluster.spec.service_cluster_ip_range
        ),
        "--tls-cert-file=/pki/server/kubernetes-server.pem".to_string(),
        "--tls-private-key-file=/pki/server/kubernetes-server-key.pem".to_string(),
    ]
}

/// Generate the API server Deployment
pub fn generate_apiserver_deployment(cluster: &Cluster) -> Deployment {
    let container = Container {
        name: "apiserver".to_string(),
        image: Some(cluster.spec.api_server.image.clone()),
        command: Some(command(cluster)),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: APISERVER_PORT,
            ..Default::default()
        }]),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            failure_threshold: Some(8),
            ..https_probe("/livez")
        }),
        readiness_probe: Some(Probe {
            period_seconds: Some(1),
            failure_threshold: Some(3),
            ..https_probe("/readyz")
        }),
        startup_probe: Some(Probe {
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            failure_threshold: Some(24),
            ..https_probe("/livez")
        }),
        volume_mounts: Some(VOLUMES.iter().map(|v| pki_mount(v)).collect()),
        ..Default::default()
    };

    generate_deployment(
        cluster,
        &names::apiserver(cluster),
        cluster.spec.api_server.count,
        PodSpec {
            containers: vec![container],
            volumes: Some(select_volumes(cluster, &VOLUMES)),
            ..Default::default()
        },
    )
}

/// Generate the NodePort Service exposing the API server
pub fn generate_apiserver_service(cluster: &Cluster) -> Service {
    let name = names::apiserver(cluster);
    let cluster_name = cluster.name_any();

    Service {
        metadata: ObjectMeta {
            labels: Some(standard_labels(&cluster_name, &name)),
            namespace: cluster.namespace(),
            owner_references: Some(vec![owner_reference(cluster)]),
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&cluster_name, &name)),
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: APISERVER_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
