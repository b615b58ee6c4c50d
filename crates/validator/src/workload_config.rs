use std::collections::BTreeMap;
use std::str::FromStr;

use derive_more::Display;
use tracing::info;
use tracing::warn;

/// Node label selecting how GPUs on the node are consumed.
pub const WORKLOAD_CONFIG_LABEL: &str = "nvidia.com/gpu.workload.config";

/// GPU operating mode of a node.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadConfig {
    /// GPUs are handed to containers.
    #[display("container")]
    Container,
    /// Whole GPUs are passed through to virtual machines.
    #[display("vm-passthrough")]
    VmPassthrough,
    /// GPUs are split into mediated vGPU devices for virtual machines.
    #[display("vm-vgpu")]
    VmVgpu,
}

impl FromStr for WorkloadConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(Self::Container),
            "vm-passthrough" => Ok(Self::VmPassthrough),
            "vm-vgpu" => Ok(Self::VmVgpu),
            other => Err(format!("{other} is an invalid workload config")),
        }
    }
}

/// Resolve the node's workload config from its labels.
///
/// A missing or unrecognised label falls back to `default`.
pub fn classify(labels: &BTreeMap<String, String>, default: WorkloadConfig) -> WorkloadConfig {
    let Some(value) = labels.get(WORKLOAD_CONFIG_LABEL) else {
        info!(
            "No {WORKLOAD_CONFIG_LABEL} label found; using default workload config: {default}"
        );
        return default;
    };

    match value.parse() {
        Ok(config) => config,
        Err(_) => {
            warn!("{value} is an invalid workload config; using default workload config: {default}");
            default
        }
    }
}
