use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;

use crate::component::Component;
use crate::dev_char::DevCharLinker;
use crate::driver_root::DriverRoot;
use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::status::StatusFile;
use crate::validators::ValidationContext;
use crate::validators::Validator;

/// Host drivers are reached through the privileged container's own `/dev`.
const HOST_DEV_ROOT: &str = "/";

/// Checks that `nvidia-smi` works against the installed driver.
pub struct DriverValidator;

#[async_trait]
impl Validator for DriverValidator {
    fn component(&self) -> Component {
        Component::Driver
    }

    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>> {
        let paths = &ctx.config.host_paths;
        let wait = ctx.config.with_wait;
        let driver_root = DriverRoot::discover(paths);

        if !driver_root.is_host_installed() {
            info!("Driver is not pre-installed on the host. Checking driver container status.");
            ctx.executor
                .run(
                    &Probe::file_exists(paths.driver_container_ready.display()),
                    wait,
                )
                .await
                .change_context(ValidatorError::NotReady {
                    component: "driver container",
                    message: "readiness flag not found".to_string(),
                })?;
        }

        let probe = Probe::chroot(
            driver_root.chroot_root.display().to_string(),
            driver_root.probe_command.clone(),
        );
        ctx.executor.run(&probe, wait).await?;

        if ctx.config.disable_dev_char_symlinks {
            info!("creation of /dev/char symlinks is disabled");
        } else {
            info!("creating symlinks under /dev/char that correspond to NVIDIA character devices");
            dev_char_linker(ctx, &driver_root)
                .create_links(&ctx.executor)
                .await?;
        }

        Ok(if driver_root.is_host_installed() {
            StatusFile::HostDriverReady
        } else {
            StatusFile::DriverReady
        })
    }
}

fn dev_char_linker(ctx: &ValidationContext, driver_root: &DriverRoot) -> DevCharLinker {
    let dev_root = if driver_root.is_host_installed() {
        PathBuf::from(HOST_DEV_ROOT)
    } else {
        driver_root.driver_root.clone()
    };
    DevCharLinker::new(
        dev_root,
        driver_root.driver_root.clone(),
        ctx.config.host_paths.host_dev_char.clone(),
    )
    .create_device_nodes(driver_root.create_device_nodes)
}
