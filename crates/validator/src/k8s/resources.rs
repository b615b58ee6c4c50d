//! GPU resources advertised by the device plugin on a node.
//!
//! MIG slices take priority over the generic resource: on a MIG enabled node
//! validation workloads must be scheduled against a slice, not a whole GPU.

use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;
use tracing::info;

use crate::config::WaitBudget;
use crate::error::ValidatorError;
use crate::k8s::ClusterApi;

/// Generic GPU resource exposed by the device plugin.
pub const GENERIC_GPU_RESOURCE: &str = "nvidia.com/gpu";
/// Prefix of MIG slice resources exposed by the device plugin.
pub const MIG_GPU_RESOURCE_PREFIX: &str = "nvidia.com/mig-";

pub type ResourceList = BTreeMap<String, Quantity>;

/// Integer value of a quantity, rounded up. Unparseable quantities count as 0.
///
/// Accepts the full quantity grammar: decimal SI suffixes (`n` to `E`), binary
/// suffixes (`Ki` to `Ei`) and exponent form (`1e3`, `5E-1`).
pub fn quantity_value(quantity: &Quantity) -> i64 {
    let raw = quantity.0.trim();
    let split = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map_or(raw.len(), |(i, _)| i);
    let (number, suffix) = raw.split_at(split);
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };
    let Some(multiplier) = suffix_multiplier(suffix) else {
        return 0;
    };
    (number * multiplier).ceil() as i64
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let binary = |power: i32| Some(1024f64.powi(power));
    let decimal = |exponent: i32| Some(10f64.powi(exponent));
    match suffix {
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?
                .parse::<i32>()
                .ok()?;
            decimal(exponent)
        }
    }
}

fn first_available<'a>(resources: &'a ResourceList, prefix: &str) -> Option<&'a str> {
    resources
        .iter()
        .find(|(name, quantity)| name.starts_with(prefix) && quantity_value(quantity) >= 1)
        .map(|(name, quantity)| {
            debug!("Found GPU resource name {name} quantity {}", quantity_value(quantity));
            name.as_str()
        })
}

/// A MIG resource with at least one unit, if any.
pub fn available_mig_resource(resources: &ResourceList) -> Option<&str> {
    first_available(resources, MIG_GPU_RESOURCE_PREFIX)
}

/// A generic GPU resource with at least one unit, if any.
pub fn available_generic_resource(resources: &ResourceList) -> Option<&str> {
    first_available(resources, GENERIC_GPU_RESOURCE)
}

/// Resource name to request, preferring MIG slices.
pub fn select_gpu_resource(resources: &ResourceList) -> Option<&str> {
    available_mig_resource(resources).or_else(|| available_generic_resource(resources))
}

/// Polls a node until the device plugin advertises GPU resources.
pub struct GpuResourceDiscoverer<'a> {
    cluster: &'a dyn ClusterApi,
    node_name: &'a str,
    budget: WaitBudget,
}

impl<'a> GpuResourceDiscoverer<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, node_name: &'a str, budget: WaitBudget) -> Self {
        Self {
            cluster,
            node_name,
            budget,
        }
    }

    async fn node(&self) -> Result<Node, Report<ValidatorError>> {
        self.cluster
            .get_node(self.node_name)
            .await
            .change_context(ValidatorError::Environment {
                message: format!(
                    "unable to fetch node by name {} to check for GPU resources",
                    self.node_name
                ),
            })
    }

    /// Wait until node capacity lists a GPU resource. Returns its name.
    #[tracing::instrument(skip(self), fields(node = %self.node_name))]
    pub async fn wait_for_capacity(&self) -> Result<String, Report<ValidatorError>> {
        for attempt in 1..=self.budget.retries {
            let node = self.node().await?;
            let capacity = node
                .status
                .and_then(|status| status.capacity)
                .unwrap_or_default();

            if let Some(name) = select_gpu_resource(&capacity) {
                info!(resource = %name, "GPU resources discovered by the node");
                return Ok(name.to_string());
            }

            info!("GPU resources are not yet discovered by the node, retry: {attempt}");
            tokio::time::sleep(self.budget.interval).await;
        }

        Err(Report::new(ValidatorError::ResourcesNotDiscovered {
            attempts: self.budget.retries,
        })
        .attach_printable(format!(
            "looked for {GENERIC_GPU_RESOURCE} and {MIG_GPU_RESOURCE_PREFIX}* on node {}",
            self.node_name
        )))
    }

    /// Name of an allocatable GPU resource to schedule a workload against.
    pub async fn allocatable_resource_name(&self) -> Result<String, Report<ValidatorError>> {
        let node = self.node().await?;
        let allocatable = node
            .status
            .and_then(|status| status.allocatable)
            .unwrap_or_default();

        select_gpu_resource(&allocatable)
            .map(str::to_string)
            .ok_or_else(|| Report::new(ValidatorError::NoAllocatableResource))
    }
}
