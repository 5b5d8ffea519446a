pub mod apiserver;
pub mod client;
pub mod common;
pub mod controller_manager;
pub mod deployment;
pub mod etcd;
pub mod init;
pub mod plugin_pod;
pub mod scheduler;

pub use common::{names, owner_reference, standard_labels};
