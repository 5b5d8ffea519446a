//! Plugin pod generation
//!
//! A plugin template is a partial pod spec. Only an allowlisted subset of
//! container fields is carried over; anything else in the template is dropped.
//! Credentials for the target cluster(s) are injected as secret volumes.

use k8s_openapi::api::core::v1::{
    Container, KeyToPath, Pod, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use crate::crd::PluginPodSpec;
use crate::resources::common::{CLUSTER_LABEL, label_value, read_only_mount};

/// Mount point of the target cluster kubeconfig inside plugin pods
pub const MOUNT_PATH: &str = "/etc/cluster/";

const KUBECONFIG_VOLUME: &str = "kubeconfig";

/// Key of the admin kubeconfig inside the secret written by the init Job
const ADMIN_CONFIG_KEY: &str = "admin.config";

/// Copy the allowlisted fields of a template container
pub fn convert_container(container: &Container) -> Container {
    Container {
        name: container.name.clone(),
        image: container.image.clone(),
        command: container.command.clone(),
        args: container.args.clone(),
        working_dir: container.working_dir.clone(),
        env_from: container.env_from.clone(),
        env: container.env.clone(),
        resources: container.resources.clone(),
        volume_mounts: container.volume_mounts.clone(),
        volume_devices: container.volume_devices.clone(),
        liveness_probe: container.liveness_probe.clone(),
        readiness_probe: container.readiness_probe.clone(),
        startup_probe: container.startup_probe.clone(),
        lifecycle: container.lifecycle.clone(),
        image_pull_policy: container.image_pull_policy.clone(),
        security_context: container.security_context.clone(),
        ..Default::default()
    }
}

/// Convert a plugin template into a run-once pod spec
pub fn convert_spec(template: &PluginPodSpec) -> PodSpec {
    let init_containers: Vec<Container> =
        template.init_containers.iter().map(convert_container).collect();

    PodSpec {
        init_containers: (!init_containers.is_empty()).then_some(init_containers),
        containers: template.containers.iter().map(convert_container).collect(),
        volumes: (!template.volumes.is_empty()).then(|| template.volumes.clone()),
        restart_policy: Some("Never".to_string()),
        service_account_name: template.service_account_name.clone(),
        image_pull_secrets: (!template.image_pull_secrets.is_empty())
            .then(|| template.image_pull_secrets.clone()),
        hostname: template.hostname.clone(),
        runtime_class_name: template.runtime_class_name.clone(),
        ..Default::default()
    }
}

fn kubeconfig_volume(name: String, secret_name: &str) -> Volume {
    Volume {
        name,
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            items: Some(vec![KeyToPath {
                key: ADMIN_CONFIG_KEY.to_string(),
                path: "config".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Append volumes to the pod and mounts to every init container and container
fn inject(spec: &mut PodSpec, volumes: Vec<Volume>, mounts: &[VolumeMount]) {
    let init = spec.init_containers.iter_mut().flatten();
    for container in init.chain(spec.containers.iter_mut()) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(mounts.iter().cloned());
    }
    spec.volumes.get_or_insert_with(Vec::new).extend(volumes);
}

/// Mount one cluster's admin kubeconfig at `/etc/cluster/` and `/root/.kube/`
pub fn inject_cluster_credentials(spec: &mut PodSpec, admin_config_secret: &str) {
    let mounts = [
        read_only_mount(KUBECONFIG_VOLUME, MOUNT_PATH),
        read_only_mount(KUBECONFIG_VOLUME, "/root/.kube/"),
    ];
    let volume = kubeconfig_volume(KUBECONFIG_VOLUME.to_string(), admin_config_secret);
    inject(spec, vec![volume], &mounts);
}

/// Mount each cluster's admin kubeconfig at `/etc/cluster/<cluster>/`
///
/// `clusters` pairs a cluster name with its admin config secret name. Volumes
/// are named by position since Cluster names may be longer than a volume
/// name allows.
pub fn inject_multi_cluster_credentials(spec: &mut PodSpec, clusters: &[(String, String)]) {
    let mut volumes = Vec::with_capacity(clusters.len());
    let mut mounts = Vec::with_capacity(clusters.len());
    for (index, (cluster, secret)) in clusters.iter().enumerate() {
        let volume_name = format!("{}-{}", KUBECONFIG_VOLUME, index);
        mounts.push(read_only_mount(
            &volume_name,
            &format!("{}{}/", MOUNT_PATH, cluster),
        ));
        volumes.push(kubeconfig_volume(volume_name, secret));
    }
    inject(spec, volumes, &mounts);
}

/// Wrap a converted spec into a Pod owned by the plugin
pub fn generate_plugin_pod(
    name: &str,
    namespace: &str,
    cluster_names: &[String],
    owner: OwnerReference,
    spec: PodSpec,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_LABEL.to_string(),
                // DNS names never contain '_'; long lists are cut and hashed
                label_value(&cluster_names.join("_")),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}
