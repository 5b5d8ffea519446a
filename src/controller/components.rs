//! Control-plane components
//!
//! One [`ObjectModule`] per child object. Variant-specific data (images, etcd
//! release) comes from the [`VariantConfig`] each component is built with;
//! everything else is derived from the Cluster.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::discovery::ApiResource;

use crate::controller::module::{ObjectModule, sync_spec};
use crate::controller::store::api_resource;
use crate::controller::validation::{
    FieldError, require_at_least, require_ipv4_cidr, require_non_empty, require_odd_quorum,
    require_unchanged,
};
use crate::crd::{Cluster, ClusterSpec, ClusterStatus, DeploymentComponentStatus, EtcdCluster};
use crate::resources::common::next_ip_in_range;
use crate::resources::deployment::deployment_available;
use crate::resources::etcd::members_ready;
use crate::resources::{apiserver, client, controller_manager, etcd, init, scheduler};
use crate::versions::VariantConfig;

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_CLUSTER_CIDR: &str = "10.0.0.0/8";
pub const DEFAULT_SERVICE_RANGE: &str = "10.96.0.0/12";
pub const DEFAULT_REGISTRY_MIRROR: &str = "https://registry.docker-cn.com";
pub const DEFAULT_PROXY_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_ETCD_COUNT: i32 = 3;
pub const DEFAULT_APISERVER_COUNT: i32 = 3;

fn fill(field: &mut String, value: &str) {
    if field.is_empty() {
        *field = value.to_string();
    }
}

fn fill_count(count: &mut i32, value: i32) {
    if *count == 0 {
        *count = value;
    }
}

/// ServiceAccount the init Job runs as
pub struct AdminServiceAccount;

impl ObjectModule for AdminServiceAccount {
    type Object = ServiceAccount;

    fn name(&self) -> &'static str {
        "admin-service-account"
    }

    fn render(&self, cluster: &Cluster) -> ServiceAccount {
        init::generate_service_account(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        _desired: &ServiceAccount,
        observed: &mut ServiceAccount,
    ) -> bool {
        status.init.service_account_name = observed.metadata.name.clone().unwrap_or_default();
        false
    }
}

/// RoleBinding granting the admin ServiceAccount `cluster-admin`
pub struct AdminRoleBinding;

impl ObjectModule for AdminRoleBinding {
    type Object = RoleBinding;

    fn name(&self) -> &'static str {
        "admin-role-binding"
    }

    fn render(&self, cluster: &Cluster) -> RoleBinding {
        init::generate_role_binding(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        _desired: &RoleBinding,
        observed: &mut RoleBinding,
    ) -> bool {
        status.init.role_binding_name = observed.metadata.name.clone().unwrap_or_default();
        false
    }
}

/// Bootstrap Job generating PKI and kubeconfig secrets.
///
/// Owns the cluster-wide defaults and network validation, and deletes the
/// generated secrets on teardown since they carry no owner reference.
pub struct InitJob {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for InitJob {
    type Object = Job;

    fn name(&self) -> &'static str {
        "init-job"
    }

    fn render(&self, cluster: &Cluster) -> Job {
        init::generate_init_job(cluster)
    }

    // Job templates are immutable once created; status only
    fn set_status(
        &self,
        spec: &ClusterSpec,
        status: &mut ClusterStatus,
        _desired: &Job,
        observed: &mut Job,
    ) -> bool {
        status.init.name = observed.metadata.name.clone().unwrap_or_default();
        status.init.status = observed.status.clone();
        status.init.dns_addr = next_ip_in_range(&spec.service_cluster_ip_range, 2);
        init::record_secret_names(&mut status.init, observed);
        false
    }

    fn ready(&self, cluster: &Cluster) -> bool {
        init::job_complete(
            cluster
                .status
                .as_ref()
                .and_then(|s| s.init.status.as_ref()),
        )
    }

    fn unowned_objects(&self, cluster: &Cluster) -> Vec<(ApiResource, String)> {
        let resource = api_resource::<Secret>();
        init::generated_secret_names(cluster)
            .into_iter()
            .map(|name| (resource.clone(), name))
            .collect()
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill(&mut spec.cluster_domain, DEFAULT_CLUSTER_DOMAIN);
        fill(&mut spec.cluster_cidr, DEFAULT_CLUSTER_CIDR);
        fill(&mut spec.service_cluster_ip_range, DEFAULT_SERVICE_RANGE);
        if spec.registry_mirrors.is_empty() {
            spec.registry_mirrors = vec![DEFAULT_REGISTRY_MIRROR.to_string()];
        }
        fill(&mut spec.init.image, self.variant.init_image);
        fill(
            &mut spec.kubelet.pod_infra_container_image,
            self.variant.pause_image,
        );
        fill(&mut spec.kube_proxy.bind_address, DEFAULT_PROXY_BIND_ADDRESS);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let spec = &cluster.spec;
        let mut errors = Vec::new();
        require_non_empty(&mut errors, "spec.clusterDomain", &spec.cluster_domain);
        require_ipv4_cidr(&mut errors, "spec.clusterCidr", &spec.cluster_cidr);
        require_ipv4_cidr(
            &mut errors,
            "spec.serviceClusterIpRange",
            &spec.service_cluster_ip_range,
        );
        require_non_empty(&mut errors, "spec.init.image", &spec.init.image);
        require_non_empty(
            &mut errors,
            "spec.kubelet.podInfraContainerImage",
            &spec.kubelet.pod_infra_container_image,
        );
        errors
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let (o, n) = (&old.spec, &new.spec);
        let mut errors = Vec::new();
        require_unchanged(
            &mut errors,
            "spec.clusterDomain",
            n.cluster_domain.as_str(),
            o.cluster_domain.as_str(),
        );
        require_unchanged(
            &mut errors,
            "spec.clusterCidr",
            n.cluster_cidr.as_str(),
            o.cluster_cidr.as_str(),
        );
        require_unchanged(
            &mut errors,
            "spec.serviceClusterIpRange",
            n.service_cluster_ip_range.as_str(),
            o.service_cluster_ip_range.as_str(),
        );
        require_unchanged(
            &mut errors,
            "spec.init.image",
            n.init.image.as_str(),
            o.init.image.as_str(),
        );
        require_unchanged(
            &mut errors,
            "spec.kubelet.podInfraContainerImage",
            n.kubelet.pod_infra_container_image.as_str(),
            o.kubelet.pod_infra_container_image.as_str(),
        );
        require_unchanged(
            &mut errors,
            "spec.kubeProxy.bindAddress",
            n.kube_proxy.bind_address.as_str(),
            o.kube_proxy.bind_address.as_str(),
        );
        errors
    }
}

/// etcd cluster managed by the external etcd operator
pub struct EtcdMembers {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for EtcdMembers {
    type Object = EtcdCluster;

    fn name(&self) -> &'static str {
        "etcd-cluster"
    }

    fn render(&self, cluster: &Cluster) -> EtcdCluster {
        etcd::generate_etcd_cluster(cluster, self.variant)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &EtcdCluster,
        observed: &mut EtcdCluster,
    ) -> bool {
        status.etcd.name = observed.metadata.name.clone().unwrap_or_default();
        status.etcd.svc_name = observed
            .status
            .as_ref()
            .map(|s| s.service_name.clone())
            .unwrap_or_default();
        status.etcd.status = observed.status.clone();
        sync_spec(&desired.spec, &mut observed.spec)
    }

    fn ready(&self, cluster: &Cluster) -> bool {
        members_ready(
            cluster
                .status
                .as_ref()
                .and_then(|s| s.etcd.status.as_ref()),
            cluster.spec.etcd.count,
        )
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill_count(&mut spec.etcd.count, DEFAULT_ETCD_COUNT);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_odd_quorum(&mut errors, "spec.etcd.count", cluster.spec.etcd.count);
        errors
    }

    fn validate_update(&self, _old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_odd_quorum(&mut errors, "spec.etcd.count", new.spec.etcd.count);
        errors
    }
}

fn record_deployment(slot: &mut DeploymentComponentStatus, observed: &Deployment) {
    slot.name = observed.metadata.name.clone().unwrap_or_default();
    slot.status = observed.status.clone();
}

/// Shared image/count validation for the replicated control-plane Deployments
fn validate_component_create(
    errors: &mut Vec<FieldError>,
    path: &str,
    image: &str,
    count: i32,
) {
    require_non_empty(errors, &format!("{}.image", path), image);
    require_at_least(errors, &format!("{}.count", path), count, 1);
}

fn validate_component_update(
    errors: &mut Vec<FieldError>,
    path: &str,
    old_image: &str,
    new_image: &str,
    new_count: i32,
) {
    require_unchanged(errors, &format!("{}.image", path), new_image, old_image);
    require_at_least(errors, &format!("{}.count", path), new_count, 1);
}

/// API server Deployment; gates the next stage on `Available`
pub struct ApiServerDeployment {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for ApiServerDeployment {
    type Object = Deployment;

    fn name(&self) -> &'static str {
        "apiserver-deployment"
    }

    fn render(&self, cluster: &Cluster) -> Deployment {
        apiserver::generate_apiserver_deployment(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &Deployment,
        observed: &mut Deployment,
    ) -> bool {
        status.api_server.name = observed.metadata.name.clone().unwrap_or_default();
        status.api_server.status = observed.status.clone();
        sync_spec(&desired.spec, &mut observed.spec)
    }

    fn ready(&self, cluster: &Cluster) -> bool {
        deployment_available(
            cluster
                .status
                .as_ref()
                .and_then(|s| s.api_server.status.as_ref()),
        )
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill(&mut spec.api_server.image, self.variant.apiserver_image);
        fill_count(&mut spec.api_server.count, DEFAULT_APISERVER_COUNT);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let c = &cluster.spec.api_server;
        validate_component_create(&mut errors, "spec.apiServer", &c.image, c.count);
        errors
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        validate_component_update(
            &mut errors,
            "spec.apiServer",
            &old.spec.api_server.image,
            &new.spec.api_server.image,
            new.spec.api_server.count,
        );
        errors
    }
}

/// NodePort Service in front of the API server; never rewritten once created
pub struct ApiServerService;

impl ObjectModule for ApiServerService {
    type Object = Service;

    fn name(&self) -> &'static str {
        "apiserver-service"
    }

    fn render(&self, cluster: &Cluster) -> Service {
        apiserver::generate_apiserver_service(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        _desired: &Service,
        observed: &mut Service,
    ) -> bool {
        status.api_server.svc_name = observed.metadata.name.clone().unwrap_or_default();
        false
    }
}

pub struct ControllerManagerDeployment {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for ControllerManagerDeployment {
    type Object = Deployment;

    fn name(&self) -> &'static str {
        "controller-manager-deployment"
    }

    fn render(&self, cluster: &Cluster) -> Deployment {
        controller_manager::generate_controller_manager_deployment(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &Deployment,
        observed: &mut Deployment,
    ) -> bool {
        record_deployment(&mut status.controller_manager, observed);
        sync_spec(&desired.spec, &mut observed.spec)
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill(
            &mut spec.controller_manager.image,
            self.variant.controller_manager_image,
        );
        fill_count(&mut spec.controller_manager.count, 1);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let c = &cluster.spec.controller_manager;
        validate_component_create(&mut errors, "spec.controllerManager", &c.image, c.count);
        errors
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        validate_component_update(
            &mut errors,
            "spec.controllerManager",
            &old.spec.controller_manager.image,
            &new.spec.controller_manager.image,
            new.spec.controller_manager.count,
        );
        errors
    }
}

pub struct SchedulerDeployment {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for SchedulerDeployment {
    type Object = Deployment;

    fn name(&self) -> &'static str {
        "scheduler-deployment"
    }

    fn render(&self, cluster: &Cluster) -> Deployment {
        scheduler::generate_scheduler_deployment(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &Deployment,
        observed: &mut Deployment,
    ) -> bool {
        record_deployment(&mut status.scheduler, observed);
        sync_spec(&desired.spec, &mut observed.spec)
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill(&mut spec.scheduler.image, self.variant.scheduler_image);
        fill_count(&mut spec.scheduler.count, 1);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let c = &cluster.spec.scheduler;
        validate_component_create(&mut errors, "spec.scheduler", &c.image, c.count);
        errors
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        validate_component_update(
            &mut errors,
            "spec.scheduler",
            &old.spec.scheduler.image,
            &new.spec.scheduler.image,
            new.spec.scheduler.count,
        );
        errors
    }
}

pub struct ClientDeployment {
    pub variant: &'static VariantConfig,
}

impl ObjectModule for ClientDeployment {
    type Object = Deployment;

    fn name(&self) -> &'static str {
        "client-deployment"
    }

    fn render(&self, cluster: &Cluster) -> Deployment {
        client::generate_client_deployment(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        desired: &Deployment,
        observed: &mut Deployment,
    ) -> bool {
        record_deployment(&mut status.client, observed);
        sync_spec(&desired.spec, &mut observed.spec)
    }

    fn apply_defaults(&self, spec: &mut ClusterSpec) {
        fill(&mut spec.client.image, self.variant.client_image);
    }

    fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_non_empty(&mut errors, "spec.client.image", &cluster.spec.client.image);
        errors
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_unchanged(
            &mut errors,
            "spec.client.image",
            new.spec.client.image.as_str(),
            old.spec.client.image.as_str(),
        );
        errors
    }
}

/// One-shot Job run once the hosted API server is up
pub struct InstallPostJob;

impl ObjectModule for InstallPostJob {
    type Object = Job;

    fn name(&self) -> &'static str {
        "install-post-job"
    }

    fn render(&self, cluster: &Cluster) -> Job {
        client::generate_install_post_job(cluster)
    }

    fn set_status(
        &self,
        _spec: &ClusterSpec,
        status: &mut ClusterStatus,
        _desired: &Job,
        observed: &mut Job,
    ) -> bool {
        status.post_install.name = observed.metadata.name.clone().unwrap_or_default();
        status.post_install.status = observed.status.clone();
        false
    }
}
