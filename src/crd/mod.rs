mod cluster;
mod etcd;
mod plugin;

pub use cluster::*;
pub use etcd::*;
pub use plugin::*;
