//! Kubernetes integration module.
//!
//! The validator only needs a handful of API calls: reading its node, managing
//! verification pods in the operator namespace, and reading its own
//! DaemonSet. They sit behind [`ClusterApi`] so validators can be exercised
//! without a live cluster.
//!
//! The main components are:
//! - [`ClusterApi`]: the API surface used by validators
//! - [`KubeCluster`]: [`ClusterApi`] backed by a `kube` client
//! - [`resources`]: GPU resource discovery on node capacity/allocatable maps

pub mod cluster;
pub mod kube_client;
pub mod resources;
pub mod types;

pub use cluster::ClusterApi;
pub use cluster::KubeCluster;
pub use kube_client::init_kube_client;
pub use types::ClusterError;
