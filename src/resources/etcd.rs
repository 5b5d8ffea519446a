//! EtcdCluster generation
//!
//! The etcd members themselves are run by an external etcd operator; this
//! crate only declares the desired cluster and reads back its member status.

use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{
    Cluster, EtcdCluster, EtcdClusterSpec, EtcdClusterStatus, MemberSecret, StaticTls, TlsPolicy,
};
use crate::resources::common::{names, owner_reference, standard_labels};
use crate::versions::VariantConfig;

/// Generate the EtcdCluster sized by `spec.etcd.count`, secured with the init Job's secrets
pub fn generate_etcd_cluster(cluster: &Cluster, variant: &VariantConfig) -> EtcdCluster {
    let name = names::etcd(cluster);
    let init = cluster
        .status
        .as_ref()
        .map(|s| s.init.clone())
        .unwrap_or_default();

    let mut etcd = EtcdCluster::new(
        &name,
        EtcdClusterSpec {
            size: cluster.spec.etcd.count,
            repository: Some(variant.etcd_repository.to_string()),
            version: Some(variant.etcd_version.to_string()),
            tls: Some(TlsPolicy {
                static_tls: Some(StaticTls {
                    member: Some(MemberSecret {
                        peer_secret: init.etcd_pki_peer_name,
                        server_secret: init.etcd_pki_server_name,
                    }),
                    operator_secret: init.etcd_pki_client_name,
                }),
            }),
        },
    );
    etcd.metadata = ObjectMeta {
        labels: Some(standard_labels(&cluster.name_any(), &name)),
        name: Some(name),
        namespace: cluster.namespace(),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    };
    etcd
}

/// All requested members are up: ready members == observed size == requested count
pub fn members_ready(status: Option<&EtcdClusterStatus>, requested: i32) -> bool {
    match status {
        Some(s) => {
            usize::try_from(s.size).is_ok_and(|size| s.members.ready.len() == size)
                && s.size == requested
        }
        None => false,
    }
}
