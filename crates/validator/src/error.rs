use std::path::PathBuf;

use thiserror::Error;

/// Operator-facing guidance appended to symlink creation failures.
pub const DEV_CHAR_REMEDIATION: &str = "\
Failed to create symlinks under /dev/char that point to all possible NVIDIA character devices.
The existence of these symlinks is required to address the following bug:

    https://github.com/NVIDIA/gpu-operator/issues/430

This bug impacts container runtimes configured with systemd cgroup management enabled.
To disable the symlink creation, set the following envvar in ClusterPolicy:

    validator:
      driver:
        env:
        - name: DISABLE_DEV_CHAR_SYMLINK_CREATION
          value: \"true\"";

/// Errors surfaced by component validation.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
    #[error("cluster environment unavailable: {message}")]
    Environment { message: String },
    #[error("unable to update status file {}", path.display())]
    StatusFile { path: PathBuf },
    #[error("probe `{probe}` did not succeed")]
    ProbeFailed { probe: String },
    #[error("{component} is not ready: {message}")]
    NotReady {
        component: &'static str,
        message: String,
    },
    #[error("GPU resources are not discovered by the node after {attempts} attempts")]
    ResourcesNotDiscovered { attempts: u32 },
    #[error("unable to find any allocatable GPU resource")]
    NoAllocatableResource,
    #[error("validation pod lifecycle failed: {message}")]
    PodLifecycle { message: String },
    #[error("invalid verification pod template: {message}")]
    Template { message: String },
    #[error("{message}\n\n{DEV_CHAR_REMEDIATION}")]
    DevCharSymlinks { message: String },
    #[error("failed to read sysfs: {message}")]
    Sysfs { message: String },
    #[error("validation interrupted")]
    Cancelled,
    #[error("error validating {what}")]
    ValidationFailed { what: &'static str },
}
