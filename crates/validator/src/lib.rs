//! Node local readiness validation for the NVIDIA GPU stack.
//!
//! One invocation validates one [`component::Component`] and reports the
//! result through marker files under the output directory.

pub mod component;
pub mod config;
pub mod dev_char;
pub mod driver_root;
pub mod error;
pub mod k8s;
pub mod probe;
pub mod status;
pub mod sysfs;
pub mod validators;
pub mod workload;
pub mod workload_config;
