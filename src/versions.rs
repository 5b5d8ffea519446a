//! Supported control-plane variants
//!
//! Variants share one stage layout and differ only in the images they run.

use crate::controller::components::{
    AdminRoleBinding, AdminServiceAccount, ApiServerDeployment, ApiServerService, ClientDeployment,
    ControllerManagerDeployment, EtcdMembers, InitJob, InstallPostJob, SchedulerDeployment,
};
use crate::controller::module::{Leaf, Stage};
use crate::controller::registry::{Registry, RegistryBuilder};

/// Images and etcd release of one control-plane variant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantConfig {
    pub version: &'static str,
    pub etcd_repository: &'static str,
    pub etcd_version: &'static str,
    pub apiserver_image: &'static str,
    pub controller_manager_image: &'static str,
    pub scheduler_image: &'static str,
    pub client_image: &'static str,
    pub init_image: &'static str,
    pub pause_image: &'static str,
}

pub static X86: VariantConfig = VariantConfig {
    version: "x86-1.18.4",
    etcd_repository: "quay.io/coreos/etcd",
    etcd_version: "3.2.13",
    apiserver_image: "registry.aliyuncs.com/google_containers/kube-apiserver:v1.18.4",
    controller_manager_image: "registry.aliyuncs.com/google_containers/kube-controller-manager:v1.18.4",
    scheduler_image: "registry.aliyuncs.com/google_containers/kube-scheduler:v1.18.4",
    client_image: "ccr.ccs.tencentyun.com/k8sonk8s/init:v1",
    init_image: "ccr.ccs.tencentyun.com/k8sonk8s/init:v1",
    pause_image: "registry.aliyuncs.com/google_containers/pause:3.1",
};

pub static ARM: VariantConfig = VariantConfig {
    version: "arm-1.18.1",
    etcd_repository: "etcd-arm64",
    etcd_version: "3.4.3-0",
    apiserver_image: "mirrorgcrio/kube-apiserver-arm64:v1.18.1",
    controller_manager_image: "mirrorgcrio/kube-controller-manager-arm64:v1.18.1",
    scheduler_image: "mirrorgcrio/kube-scheduler-arm64:v1.18.1",
    client_image: "ccr.ccs.tencentyun.com/k8sonk8s/init:v1-arm64",
    init_image: "ccr.ccs.tencentyun.com/k8sonk8s/init:v1-arm64",
    pause_image: "mirrorgcrio/pause-arm64:3.2",
};

/// Stage names, in pipeline order
pub mod stages {
    pub const INIT: &str = "init";
    pub const ETCD: &str = "etcd";
    pub const APISERVER: &str = "apiserver";
    pub const CONTROLLER_MANAGER: &str = "controller-manager";
    pub const SCHEDULER: &str = "scheduler";
    pub const CLIENT: &str = "client";
}

/// The six stages of a variant
pub fn build_stages(variant: &'static VariantConfig) -> Vec<Stage> {
    vec![
        Stage::new(stages::INIT, 10)
            .with(Leaf::boxed(AdminServiceAccount))
            .with(Leaf::boxed(AdminRoleBinding))
            .with(Leaf::boxed(InitJob { variant })),
        Stage::new(stages::ETCD, 20).with(Leaf::boxed(EtcdMembers { variant })),
        Stage::new(stages::APISERVER, 30)
            .with(Leaf::boxed(ApiServerDeployment { variant }))
            .with(Leaf::boxed(ApiServerService)),
        Stage::new(stages::CONTROLLER_MANAGER, 40)
            .with(Leaf::boxed(ControllerManagerDeployment { variant })),
        Stage::new(stages::SCHEDULER, 50).with(Leaf::boxed(SchedulerDeployment { variant })),
        Stage::new(stages::CLIENT, 60)
            .with(Leaf::boxed(ClientDeployment { variant }))
            .with(Leaf::boxed(InstallPostJob)),
    ]
}

fn register_variant(builder: RegistryBuilder, variant: &'static VariantConfig) -> RegistryBuilder {
    build_stages(variant)
        .into_iter()
        .fold(builder, |b, stage| b.register(variant.version, stage))
}

/// Registry with every supported variant
pub fn default_registry() -> Registry {
    [&X86, &ARM]
        .into_iter()
        .fold(Registry::builder(), register_variant)
        .build()
}
