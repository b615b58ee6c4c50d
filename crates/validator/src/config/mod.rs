pub mod cli;

use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;

use crate::component::Component;
use crate::error::ValidatorError;
use crate::workload_config::WorkloadConfig;

pub use cli::Cli;

/// Immutable settings for one validation run, captured at process start.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub component: Component,
    pub kubeconfig: Option<PathBuf>,
    pub node_name: Option<String>,
    pub namespace: Option<String>,
    pub with_wait: bool,
    pub with_workload: bool,
    pub cleanup_all: bool,
    pub output_dir: PathBuf,
    pub sleep_interval: Duration,
    /// Used when the node carries no valid workload config label.
    pub default_workload_config: WorkloadConfig,
    pub disable_dev_char_symlinks: bool,
    pub manifests_dir: PathBuf,
    pub pod_image: PodImageSettings,
    pub rdma: RdmaSettings,
    pub host_paths: HostPaths,
    /// Budget for a verification pod to reach `Succeeded`.
    pub pod_wait: WaitBudget,
    /// Budget for the node to advertise GPU resources.
    pub resource_wait: WaitBudget,
}

impl ValidatorConfig {
    /// Configuration with production defaults for `component`.
    pub fn new(component: Component) -> Self {
        Self {
            component,
            kubeconfig: None,
            node_name: None,
            namespace: None,
            with_wait: false,
            with_workload: true,
            cleanup_all: false,
            output_dir: PathBuf::from("/run/nvidia/validations"),
            sleep_interval: Duration::from_secs(5),
            default_workload_config: WorkloadConfig::VmPassthrough,
            disable_dev_char_symlinks: false,
            manifests_dir: PathBuf::from("/var/nvidia/manifests"),
            pod_image: PodImageSettings::default(),
            rdma: RdmaSettings::default(),
            host_paths: HostPaths::default(),
            pod_wait: WaitBudget {
                retries: 60,
                interval: Duration::from_secs(5),
            },
            resource_wait: WaitBudget {
                retries: 30,
                interval: Duration::from_secs(5),
            },
        }
    }

    pub fn node_name(&self) -> Result<&str, Report<ValidatorError>> {
        self.node_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Report::new(ValidatorError::InvalidConfig {
                    message: format!(
                        "node name must not be empty string for {} validation",
                        self.component
                    ),
                })
            })
    }

    pub fn namespace(&self) -> Result<&str, Report<ValidatorError>> {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                Report::new(ValidatorError::InvalidConfig {
                    message: format!(
                        "namespace must not be empty string for {} validation",
                        self.component
                    ),
                })
            })
    }
}

impl TryFrom<Cli> for ValidatorConfig {
    type Error = Report<ValidatorError>;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let defaults = ValidatorConfig::new(cli.component);

        let default_workload_config = cli
            .default_gpu_workload_config
            .as_deref()
            .and_then(|value| value.parse::<WorkloadConfig>().ok())
            .unwrap_or(defaults.default_workload_config);

        let config = Self {
            component: cli.component,
            kubeconfig: cli.kubeconfig,
            node_name: cli.node_name,
            namespace: cli.namespace,
            with_wait: cli.with_wait,
            with_workload: cli.with_workload,
            cleanup_all: cli.cleanup_all,
            output_dir: cli.output_dir,
            sleep_interval: Duration::from_secs(cli.sleep_interval_seconds),
            default_workload_config,
            disable_dev_char_symlinks: cli.disable_dev_char_symlink_creation,
            manifests_dir: cli.manifests_dir,
            pod_image: PodImageSettings {
                image: cli.validator_image.filter(|s| !s.is_empty()),
                pull_policy: cli.validator_image_pull_policy.filter(|s| !s.is_empty()),
                pull_secrets: cli
                    .validator_image_pull_secrets
                    .as_deref()
                    .map(parse_pull_secrets)
                    .unwrap_or_default(),
                runtime_class: cli.validator_runtime_class.filter(|s| !s.is_empty()),
            },
            rdma: RdmaSettings {
                gpu_direct_rdma_enabled: cli.gpu_direct_rdma_enabled.as_deref() == Some("true"),
                use_host_mofed: cli.use_host_mofed.as_deref() == Some("true"),
            },
            ..defaults
        };

        if config.component.requires_node_name() {
            config.node_name()?;
        }
        if config.component.requires_namespace() {
            config.namespace()?;
        }

        Ok(config)
    }
}

fn parse_pull_secrets(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|secret| !secret.is_empty())
        .map(str::to_string)
        .collect()
}

/// Image parameters for verification pods, taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodImageSettings {
    pub image: Option<String>,
    pub pull_policy: Option<String>,
    pub pull_secrets: Vec<String>,
    pub runtime_class: Option<String>,
}

/// Interconnect driver switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RdmaSettings {
    pub gpu_direct_rdma_enabled: bool,
    /// MOFED is pre-installed on the host instead of coming from a driver container.
    pub use_host_mofed: bool,
}

/// A fixed retry count with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub retries: u32,
    pub interval: Duration,
}

/// Host and container paths the probes look at.
///
/// Paths are as seen from inside the validator container unless noted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Host root filesystem mount.
    pub host_root: PathBuf,
    /// Where the driver container exposes its root filesystem.
    pub driver_container_root: PathBuf,
    /// Driver install location on hosts that cannot be chrooted into,
    /// relative to the host root.
    pub driver_host_root: PathBuf,
    /// Host `/dev/char` mount.
    pub host_dev_char: PathBuf,
    pub sysfs_root: PathBuf,
    /// Flag written by the driver container once it is ready.
    pub driver_container_ready: PathBuf,
    /// Flag written by the CC manager container once it is ready.
    pub cc_manager_container_ready: PathBuf,
    /// Flag written by the MOFED driver container once it is ready.
    pub mofed_driver_ready: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            host_root: PathBuf::from("/host"),
            driver_container_root: PathBuf::from("/run/nvidia/driver"),
            driver_host_root: PathBuf::from("/home/kubernetes/bin/nvidia"),
            host_dev_char: PathBuf::from("/host-dev-char"),
            sysfs_root: PathBuf::from("/sys"),
            driver_container_ready: PathBuf::from("/run/nvidia/validations/.driver-ctr-ready"),
            cc_manager_container_ready: PathBuf::from(
                "/run/nvidia/validations/.cc-manager-ctr-ready",
            ),
            mofed_driver_ready: PathBuf::from("/run/mellanox/drivers/.driver-ready"),
        }
    }
}

impl HostPaths {
    /// `nvidia-smi` of a driver pre-installed on the host.
    pub fn host_nvidia_smi(&self) -> PathBuf {
        self.host_root.join("usr/bin/nvidia-smi")
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use similar_asserts::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> Result<ValidatorConfig, Report<ValidatorError>> {
        let cli = Cli::try_parse_from(std::iter::once("gpu-validator").chain(args.iter().copied()))
            .unwrap();
        ValidatorConfig::try_from(cli)
    }

    #[test]
    fn driver_needs_no_cluster_settings() {
        let config = parse(&["-c", "driver"]).unwrap();
        assert_eq!(config.component, Component::Driver);
        assert!(config.with_workload);
        assert!(!config.with_wait);
        assert_eq!(config.sleep_interval, Duration::from_secs(5));
        assert_eq!(config.default_workload_config, WorkloadConfig::VmPassthrough);
    }

    #[test]
    fn plugin_requires_node_and_namespace() {
        let err = parse(&["-c", "plugin", "--namespace", "gpu-operator"]).unwrap_err();
        assert!(err.to_string().contains("node name"));

        let err = parse(&["-c", "plugin", "-n", "node-a"]).unwrap_err();
        assert!(err.to_string().contains("namespace"));

        let config = parse(&["-c", "plugin", "-n", "node-a", "--ns", "gpu-operator"]).unwrap();
        assert_eq!(config.node_name().unwrap(), "node-a");
        assert_eq!(config.namespace().unwrap(), "gpu-operator");
    }

    #[test]
    fn cuda_requires_namespace_and_node() {
        assert!(parse(&["-c", "cuda", "-n", "node-a"]).is_err());
        assert!(parse(&["-c", "cuda", "--namespace", "gpu-operator"]).is_err());
        assert!(parse(&["-c", "cuda", "-n", "node-a", "--namespace", "gpu-operator"]).is_ok());
    }

    #[test]
    fn sandbox_components_require_node_name() {
        for component in ["vfio-pci", "vgpu-manager", "vgpu-devices", "cc-manager"] {
            assert!(parse(&["-c", component]).is_err(), "{component}");
            assert!(parse(&["-c", component, "-n", "node-a"]).is_ok(), "{component}");
        }
    }

    #[test]
    fn default_workload_config_override() {
        let config = parse(&["-c", "driver", "-g", "vm-vgpu"]).unwrap();
        assert_eq!(config.default_workload_config, WorkloadConfig::VmVgpu);

        let config = parse(&["-c", "driver", "-g", "bogus"]).unwrap();
        assert_eq!(config.default_workload_config, WorkloadConfig::VmPassthrough);
    }

    #[test]
    fn workload_flag_and_pod_image_settings() {
        let config = parse(&[
            "-c",
            "cuda",
            "-n",
            "node-a",
            "--namespace",
            "gpu-operator",
            "--with-workload",
            "false",
            "--validator-image",
            "nvcr.io/nvidia/validator:v1",
            "--validator-image-pull-secrets",
            "first, second,,",
            "--gpu-direct-rdma-enabled",
            "true",
            "--use-host-mofed",
            "yes",
        ])
        .unwrap();
        assert!(!config.with_workload);
        assert_eq!(
            config.pod_image,
            PodImageSettings {
                image: Some("nvcr.io/nvidia/validator:v1".to_string()),
                pull_policy: None,
                pull_secrets: vec!["first".to_string(), "second".to_string()],
                runtime_class: None,
            }
        );
        assert!(config.rdma.gpu_direct_rdma_enabled);
        assert!(!config.rdma.use_host_mofed);
    }

    #[test]
    fn metrics_passes_config_without_node_name() {
        let config = parse(&["-c", "metrics"]).unwrap();
        assert_eq!(config.component, Component::Metrics);
        assert!(config.node_name.is_none());
    }

    #[test]
    fn unknown_component_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["gpu-validator", "-c", "gpu"]).is_err());
    }
}
