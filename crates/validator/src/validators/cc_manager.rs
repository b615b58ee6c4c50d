use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::status::StatusFile;
use crate::validators::ValidationContext;
use crate::validators::Validator;

pub const CC_CAPABLE_LABEL: &str = "nvidia.com/cc.capable";

/// Confidential computing manager. On nodes that are not CC capable there is
/// nothing to wait for and the component is reported ready.
pub struct CcManagerValidator;

#[async_trait]
impl Validator for CcManagerValidator {
    fn component(&self) -> Component {
        Component::CcManager
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let labels = ctx.node_labels().await?;
        if labels.get(CC_CAPABLE_LABEL).map(String::as_str) != Some("true") {
            info!("Not a CC capable node, skipping CC Manager validation");
            return Ok(StatusFile::CcManagerReady);
        }

        let ready_flag = Probe::file_exists(ctx.config.host_paths.cc_manager_container_ready.display());
        ctx.executor.run(&ready_flag, ctx.config.with_wait).await?;
        Ok(StatusFile::CcManagerReady)
    }
}
