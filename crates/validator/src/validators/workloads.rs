use async_trait::async_trait;
use error_stack::Report;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::k8s::resources::GpuResourceDiscoverer;
use crate::status::StatusFile;
use crate::validators::ValidationContext;
use crate::validators::Validator;
use crate::workload::run_verification_pod;
use crate::workload::CUDA_WORKLOAD;
use crate::workload::PLUGIN_WORKLOAD;

/// Device plugin: GPUs must show up in node capacity, and a pod claiming one
/// must run.
pub struct PluginValidator;

#[async_trait]
impl Validator for PluginValidator {
    fn component(&self) -> Component {
        Component::Plugin
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let cluster = ctx.cluster().await?;
        GpuResourceDiscoverer::new(cluster, ctx.config.node_name()?, ctx.config.resource_wait)
            .wait_for_capacity()
            .await?;
        Ok(StatusFile::PluginReady)
    }

    async fn workload(&self, ctx: &ValidationContext) -> Result<(), Report<ValidatorError>> {
        let cluster = ctx.cluster().await?;
        let resource = GpuResourceDiscoverer::new(
            cluster,
            ctx.config.node_name()?,
            ctx.config.resource_wait,
        )
        .allocatable_resource_name()
        .await?;

        run_verification_pod(cluster, &ctx.config, &PLUGIN_WORKLOAD, Some(resource)).await
    }
}

/// CUDA: a vector-add workload has to run on the node.
pub struct CudaValidator;

#[async_trait]
impl Validator for CudaValidator {
    fn component(&self) -> Component {
        Component::Cuda
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        // Nothing to probe locally; the workload is the check.
        ctx.cluster().await?;
        Ok(StatusFile::CudaReady)
    }

    async fn workload(&self, ctx: &ValidationContext) -> Result<(), Report<ValidatorError>> {
        let cluster = ctx.cluster().await?;
        run_verification_pod(cluster, &ctx.config, &CUDA_WORKLOAD, None).await
    }
}
