use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::status::StatusFile;
use crate::validators::Precheck;
use crate::validators::ValidationContext;
use crate::validators::Validator;

/// Node feature discovery label set when a Mellanox PCI device is present.
pub const MELLANOX_DEVICE_LABEL: &str = "feature.node.kubernetes.io/pci-15b3.present";

/// GPUDirect Storage kernel module.
pub struct NvidiaFsValidator;

#[async_trait]
impl Validator for NvidiaFsValidator {
    fn component(&self) -> Component {
        Component::NvidiaFs
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        ctx.executor
            .run(&Probe::module_loaded("nvidia_fs"), ctx.config.with_wait)
            .await?;
        Ok(StatusFile::NvidiaFsReady)
    }
}

/// MOFED driver used by GPUDirect RDMA.
///
/// Only relevant with RDMA enabled on a node that has Mellanox hardware;
/// anywhere else the check is skipped rather than failed.
pub struct MofedValidator;

#[async_trait]
impl Validator for MofedValidator {
    fn component(&self) -> Component {
        Component::Mofed
    }

    async fn precheck(&self, ctx: &ValidationContext) -> Result<Precheck, Report<ValidatorError>> {
        if !ctx.config.rdma.gpu_direct_rdma_enabled {
            return Ok(Precheck::Skip("GPUDirect RDMA is disabled".to_string()));
        }

        let labels = ctx.node_labels().await?;
        if labels.get(MELLANOX_DEVICE_LABEL).map(String::as_str) != Some("true") {
            return Ok(Precheck::Skip("No Mellanox device label found".to_string()));
        }
        Ok(Precheck::Applies)
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let probe = if ctx.config.rdma.use_host_mofed {
            Probe::module_loaded("mlx5_core")
        } else {
            // The MOFED driver container flags its own readiness.
            Probe::file_exists(ctx.config.host_paths.mofed_driver_ready.display())
        };
        info!(probe = %probe, "checking MOFED driver");

        ctx.executor.run(&probe, ctx.config.with_wait).await?;
        Ok(StatusFile::MofedReady)
    }
}
