use std::path::PathBuf;

use clap::Parser;
use utils::version;

use crate::component::Component;

#[derive(Parser, Clone, Debug)]
#[command(about = "Validates GPU software stack components on a Kubernetes node", version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        env = "COMPONENT",
        help = "the name of the operator component to validate"
    )]
    pub component: Component,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        short = 'n',
        long,
        env = "NODE_NAME",
        help = "the name of the node to deploy plugin validation pod"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        visible_alias = "ns",
        env = "OPERATOR_NAMESPACE",
        help = "the namespace in which the operator resources are deployed"
    )]
    pub namespace: Option<String>,

    #[arg(
        short = 'w',
        long,
        env = "WITH_WAIT",
        help = "indicates to wait for validation to complete successfully"
    )]
    pub with_wait: bool,

    #[arg(
        short = 'l',
        long,
        env = "WITH_WORKLOAD",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "indicates to validate with GPU workload"
    )]
    pub with_workload: bool,

    #[arg(
        short = 'r',
        long,
        env = "CLEANUP_ALL",
        help = "indicates to cleanup all previous validation status files"
    )]
    pub cleanup_all: bool,

    #[arg(
        short = 'o',
        long,
        env = "OUTPUT_DIR",
        default_value = "/run/nvidia/validations",
        value_hint = clap::ValueHint::DirPath,
        help = "output directory where all validation status files are created"
    )]
    pub output_dir: PathBuf,

    #[arg(
        short = 's',
        long,
        env = "SLEEP_INTERVAL_SECONDS",
        default_value_t = 5,
        help = "sleep interval in seconds between command retries"
    )]
    pub sleep_interval_seconds: u64,

    #[arg(
        short = 'g',
        long,
        env = "DEFAULT_GPU_WORKLOAD_CONFIG",
        help = "default GPU workload config, used when the node carries no valid workload config label"
    )]
    pub default_gpu_workload_config: Option<String>,

    #[arg(
        long,
        env = "DISABLE_DEV_CHAR_SYMLINK_CREATION",
        help = "disable creation of symlinks under /dev/char corresponding to NVIDIA character devices"
    )]
    pub disable_dev_char_symlink_creation: bool,

    #[arg(
        long,
        default_value = "/var/nvidia/manifests",
        value_hint = clap::ValueHint::DirPath,
        help = "directory holding the workload validation pod templates"
    )]
    pub manifests_dir: PathBuf,

    #[arg(long, env = "VALIDATOR_IMAGE", hide = true)]
    pub validator_image: Option<String>,

    #[arg(long, env = "VALIDATOR_IMAGE_PULL_POLICY", hide = true)]
    pub validator_image_pull_policy: Option<String>,

    #[arg(long, env = "VALIDATOR_IMAGE_PULL_SECRETS", hide = true)]
    pub validator_image_pull_secrets: Option<String>,

    #[arg(long, env = "VALIDATOR_RUNTIME_CLASS", hide = true)]
    pub validator_runtime_class: Option<String>,

    #[arg(long, env = "GPU_DIRECT_RDMA_ENABLED", hide = true)]
    pub gpu_direct_rdma_enabled: Option<String>,

    #[arg(long, env = "USE_HOST_MOFED", hide = true)]
    pub use_host_mofed: Option<String>,
}
