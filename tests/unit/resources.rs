//! Resource generator tests: naming, ownership, credentials wiring and plugin pod conversion

use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kok_operator::crd::{Cluster, ClusterStatus, EtcdClusterStatus, InitStatus, MembersStatus};
use kok_operator::resources::common::next_ip_in_range;
use kok_operator::resources::etcd::{generate_etcd_cluster, members_ready};
use kok_operator::resources::init::{generate_init_job, generated_secret_names, job_complete};
use kok_operator::resources::plugin_pod::{convert_spec, inject_cluster_credentials};
use kok_operator::resources::{
    apiserver, client, controller_manager, names, owner_reference, scheduler,
};
use kok_operator::versions::X86;

use crate::common::*;

fn metas(cluster: &Cluster) -> Vec<ObjectMeta> {
    vec![
        generate_init_job(cluster).metadata,
        generate_etcd_cluster(cluster, &X86).metadata,
        apiserver::generate_apiserver_deployment(cluster).metadata,
        apiserver::generate_apiserver_service(cluster).metadata,
        controller_manager::generate_controller_manager_deployment(cluster).metadata,
        scheduler::generate_scheduler_deployment(cluster).metadata,
        client::generate_client_deployment(cluster).metadata,
        client::generate_install_post_job(cluster).metadata,
    ]
}

fn initialized(name: &str) -> Cluster {
    let mut cluster = defaulted_cluster(name);
    cluster.status = Some(ClusterStatus {
        init: InitStatus {
            ca_pki_name: format!("{}-ca-pki", name),
            server_name: format!("{}-k8s-server", name),
            client_name: format!("{}-k8s-client", name),
            admin_config_name: format!("{}-admin-config", name),
            etcd_pki_client_name: format!("{}-etcd-pki-client", name),
            ..Default::default()
        },
        ..Default::default()
    });
    cluster
}

// =============================================================================
// Naming and ownership
// =============================================================================

#[test]
fn test_children_are_owned_by_the_cluster() {
    let cluster = defaulted_cluster("demo");
    let owner = owner_reference(&cluster);
    assert_eq!(owner.kind, "Cluster");
    assert_eq!(owner.uid, "uid-demo");

    for meta in metas(&cluster) {
        assert_eq!(meta.namespace.as_deref(), Some(NAMESPACE));
        assert_eq!(meta.owner_references, Some(vec![owner.clone()]));
        assert_eq!(meta.labels.unwrap()["cluster"], "demo");
    }
}

#[test]
fn test_two_clusters_never_share_child_names() {
    let child_names = |cluster: Cluster| -> Vec<_> {
        metas(&cluster).into_iter().map(|m| m.name).collect()
    };
    let a = child_names(defaulted_cluster("a"));
    let b = child_names(defaulted_cluster("b"));
    assert!(a.iter().all(|name| !b.contains(name)));

    let secrets = generated_secret_names(&defaulted_cluster("a"));
    assert_eq!(secrets.len(), 8);
    assert!(secrets.iter().all(|s| s.starts_with("a-")));
}

#[test]
fn test_names_helpers() {
    let cluster = defaulted_cluster("demo");
    assert_eq!(names::init_job(&cluster), "demo-init");
    assert_eq!(names::etcd_client_service(&cluster), "demo-etcd-client");
    assert_eq!(names::install_post_job(&cluster), "demo-install-post");
    assert_eq!(names::admin_config_for("other"), "other-admin-config");
}

// =============================================================================
// Control-plane workloads
// =============================================================================

#[test]
fn test_init_job_hands_out_secret_names() {
    let job = generate_init_job(&defaulted_cluster("demo"));
    let pod = job.spec.unwrap().template.spec.unwrap();
    let env = pod.containers[0].env.clone().unwrap();
    let value = |name: &str| {
        env.iter()
            .find(|v| v.name == name)
            .and_then(|v| v.value.clone())
            .unwrap()
    };

    assert_eq!(value("KUBE_SVC_ADDR"), "10.96.0.1");
    assert_eq!(value("ADMIN_CONFIG_NAME"), "demo-admin-config");
    assert_eq!(value("ETCD_SVC_CLIENT_NAME"), "demo-etcd-client");
    assert_eq!(pod.service_account_name.as_deref(), Some("demo-admin"));
    assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
}

#[test]
fn test_workloads_mount_published_secrets() {
    let cluster = initialized("demo");
    let deployment = apiserver::generate_apiserver_deployment(&cluster);
    let pod = deployment.spec.unwrap().template.spec.unwrap();
    let secrets: Vec<_> = pod
        .volumes
        .unwrap()
        .into_iter()
        .filter_map(|v| v.secret.and_then(|s| s.secret_name))
        .collect();

    assert_eq!(
        secrets,
        vec![
            "demo-ca-pki",
            "demo-etcd-pki-client",
            "demo-k8s-server",
            "demo-k8s-client"
        ]
    );
}

#[test]
fn test_deployment_replicas_follow_spec() {
    let mut cluster = initialized("demo");
    cluster.spec.api_server.count = 5;
    cluster.spec.scheduler.count = 2;

    let replicas = |d: k8s_openapi::api::apps::v1::Deployment| d.spec.unwrap().replicas;
    assert_eq!(replicas(apiserver::generate_apiserver_deployment(&cluster)), Some(5));
    assert_eq!(replicas(scheduler::generate_scheduler_deployment(&cluster)), Some(2));
    assert_eq!(replicas(client::generate_client_deployment(&cluster)), Some(1));
}

#[test]
fn test_apiserver_service_is_node_port() {
    let service = apiserver::generate_apiserver_service(&defaulted_cluster("demo"));
    let spec = service.spec.unwrap();
    assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    assert_eq!(spec.ports.unwrap()[0].port, apiserver::APISERVER_PORT);
    assert_eq!(spec.selector.unwrap()["app"], "demo-apiserver");
}

#[test]
fn test_etcd_cluster_uses_variant_release() {
    let etcd = generate_etcd_cluster(&initialized("demo"), &X86);
    assert_eq!(etcd.spec.size, 3);
    assert_eq!(etcd.spec.version.as_deref(), Some(X86.etcd_version));
    assert_eq!(
        etcd.spec.tls.unwrap().static_tls.unwrap().operator_secret,
        "demo-etcd-pki-client"
    );
}

#[test]
fn test_renders_are_deterministic() {
    let cluster = initialized("demo");
    assert_eq!(metas(&cluster), metas(&cluster));
    assert_eq!(
        apiserver::generate_apiserver_deployment(&cluster),
        apiserver::generate_apiserver_deployment(&cluster)
    );
}

// =============================================================================
// Readiness probes on child status
// =============================================================================

#[test]
fn test_next_ip_in_range() {
    assert_eq!(next_ip_in_range("10.96.0.0/12", 1), "10.96.0.1");
    assert_eq!(next_ip_in_range("10.96.0.0/12", 2), "10.96.0.2");
    assert_eq!(next_ip_in_range("192.168.0.255/16", 1), "192.168.1.0");
    assert_eq!(next_ip_in_range("not-a-cidr", 1), "");
}

#[test]
fn test_members_ready_needs_full_requested_size() {
    let status = |size: i32, ready: usize| EtcdClusterStatus {
        size,
        members: MembersStatus {
            ready: (0..ready).map(|i| format!("m{}", i)).collect(),
            unready: Vec::new(),
        },
        ..Default::default()
    };

    assert!(members_ready(Some(&status(3, 3)), 3));
    assert!(!members_ready(Some(&status(3, 2)), 3));
    // Operator still scaling from an older size
    assert!(!members_ready(Some(&status(3, 3)), 5));
    assert!(!members_ready(None, 3));
}

#[test]
fn test_job_complete_requires_true_condition() {
    let status = |state: &str| JobStatus {
        conditions: Some(vec![JobCondition {
            type_: "Complete".to_string(),
            status: state.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    assert!(job_complete(Some(&status("True"))));
    assert!(!job_complete(Some(&status("False"))));
    assert!(!job_complete(Some(&JobStatus::default())));
    assert!(!job_complete(None));
}

// =============================================================================
// Plugin pods
// =============================================================================

#[test]
fn test_plugin_template_keeps_only_allowlisted_fields() {
    let mut template = pod_template("tools:latest");
    template.containers[0].ports = Some(vec![ContainerPort {
        container_port: 8080,
        ..Default::default()
    }]);
    template.containers[0].tty = Some(true);
    template.containers[0].working_dir = Some("/work".to_string());

    let spec = convert_spec(&template);
    let container = &spec.containers[0];
    assert_eq!(container.image.as_deref(), Some("tools:latest"));
    assert_eq!(container.working_dir.as_deref(), Some("/work"));
    assert!(container.ports.is_none());
    assert!(container.tty.is_none());
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    assert!(spec.init_containers.is_none());
}

#[test]
fn test_credentials_reach_init_containers_too() {
    let mut spec = PodSpec {
        init_containers: Some(vec![Container {
            name: "prepare".to_string(),
            ..Default::default()
        }]),
        containers: vec![Container {
            name: "main".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    inject_cluster_credentials(&mut spec, "demo-admin-config");

    let mounted = |c: &Container| {
        c.volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.clone())
            .collect::<Vec<_>>()
    };
    let expected = vec!["/etc/cluster/", "/root/.kube/"];
    assert_eq!(mounted(&spec.init_containers.as_ref().unwrap()[0]), expected);
    assert_eq!(mounted(&spec.containers[0]), expected);

    let volumes = spec.volumes.unwrap();
    assert_eq!(volumes.len(), 1);
    let secret = volumes[0].secret.as_ref().unwrap();
    assert_eq!(secret.secret_name.as_deref(), Some("demo-admin-config"));
    assert_eq!(secret.items.as_ref().unwrap()[0].key, "admin.config");
}
