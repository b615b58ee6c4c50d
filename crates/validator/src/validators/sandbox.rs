//! Components of nodes that hand GPUs to virtual machines.
//!
//! Each of them first records the node's workload config and is skipped
//! unless the node runs in the mode it serves.

use std::fs;

use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::status::StatusFile;
use crate::sysfs::Sysfs;
use crate::validators::Precheck;
use crate::validators::ValidationContext;
use crate::validators::Validator;
use crate::workload_config::WorkloadConfig;

const VFIO_PCI_DRIVER: &str = "vfio-pci";

/// Every NVIDIA GPU must be bound to `vfio-pci` for passthrough.
pub struct VfioPciValidator;

#[async_trait]
impl Validator for VfioPciValidator {
    fn component(&self) -> Component {
        Component::VfioPci
    }

    async fn precheck(&self, ctx: &ValidationContext) -> Result<Precheck, Report<ValidatorError>> {
        ctx.require_workload_config(WorkloadConfig::VmPassthrough, "vfio-pci")
            .await
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let gpus = Sysfs::new(&ctx.config.host_paths.sysfs_root).nvidia_gpus()?;
        if let Some(gpu) = gpus.iter().find(|gpu| gpu.driver != VFIO_PCI_DRIVER) {
            return Err(Report::new(ValidatorError::NotReady {
                component: "vfio-pci",
                message: format!(
                    "device not bound to '{VFIO_PCI_DRIVER}'; device: {} driver: '{}'",
                    gpu.address, gpu.driver
                ),
            }));
        }

        info!(count = gpus.len(), "all devices are bound to vfio-pci");
        Ok(StatusFile::VfioPciReady)
    }
}

/// The vGPU manager plays the role of the driver on vGPU hosts.
pub struct VgpuManagerValidator;

#[async_trait]
impl Validator for VgpuManagerValidator {
    fn component(&self) -> Component {
        Component::VgpuManager
    }

    async fn precheck(&self, ctx: &ValidationContext) -> Result<Precheck, Report<ValidatorError>> {
        ctx.require_workload_config(WorkloadConfig::VmVgpu, "vGPU Manager")
            .await
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let paths = &ctx.config.host_paths;
        let host_installed = fs::symlink_metadata(paths.host_nvidia_smi()).is_ok();

        let (root, marker) = if host_installed {
            (&paths.host_root, StatusFile::HostVgpuManagerReady)
        } else {
            (&paths.driver_container_root, StatusFile::VgpuManagerReady)
        };

        let probe = Probe::chroot(root.display().to_string(), "nvidia-smi");
        ctx.executor.run(&probe, ctx.config.with_wait).await?;
        Ok(marker)
    }
}

/// At least one NVIDIA mediated device must exist.
pub struct VgpuDevicesValidator;

#[async_trait]
impl Validator for VgpuDevicesValidator {
    fn component(&self) -> Component {
        Component::VgpuDevices
    }

    async fn precheck(&self, ctx: &ValidationContext) -> Result<Precheck, Report<ValidatorError>> {
        ctx.require_workload_config(WorkloadConfig::VmVgpu, "vGPU devices")
            .await
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let sysfs = &Sysfs::new(&ctx.config.host_paths.sysfs_root);
        let interval = ctx.executor.interval().as_secs();

        let found = ctx
            .executor
            .poll(ctx.config.with_wait, move || async move {
                let devices = sysfs.nvidia_mdev_devices()?;
                if devices.is_empty() {
                    info!("No vGPU devices found, retrying after {interval} seconds");
                    return Ok(false);
                }
                info!("Found {} vGPU devices", devices.len());
                Ok::<_, Report<ValidatorError>>(true)
            })
            .await?;

        if !found {
            return Err(Report::new(ValidatorError::NotReady {
                component: "vGPU devices",
                message: "No vGPU devices found".to_string(),
            }));
        }
        Ok(StatusFile::VgpuDevicesReady)
    }
}
