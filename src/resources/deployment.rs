//! Deployment skeleton shared by the control-plane workloads

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Cluster;
use crate::resources::common::{label_selector, owner_reference, standard_labels};

/// Wrap a pod spec into a Deployment named `name`, selected by the cluster/app labels
pub fn generate_deployment(cluster: &Cluster, name: &str, replicas: i32, pod: PodSpec) -> Deployment {
    let cluster_name = cluster.name_any();
    let labels = standard_labels(&cluster_name, name);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: label_selector(&cluster_name, name),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.to_string()),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployment has an `Available=True` condition
pub fn deployment_available(status: Option<&DeploymentStatus>) -> bool {
    status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}
