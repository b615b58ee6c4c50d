use async_trait::async_trait;
use error_stack::Report;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::status::StatusFile;
use crate::validators::ValidationContext;
use crate::validators::Validator;

/// The container toolkit injects `nvidia-smi` and the driver libraries into
/// this container; running it here proves the injection works.
pub struct ToolkitValidator;

#[async_trait]
impl Validator for ToolkitValidator {
    fn component(&self) -> Component {
        Component::Toolkit
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let probe = Probe::new("nvidia-smi", Vec::<String>::new());
        ctx.executor.run(&probe, ctx.config.with_wait).await?;
        Ok(StatusFile::ToolkitReady)
    }
}
