//! Verification workloads: a throwaway pod that has to run to completion on
//! the node before a component is reported ready.

pub mod orchestrator;
pub mod template;

use error_stack::Report;
use tracing::info;

pub use orchestrator::InheritedPolicy;
pub use orchestrator::PodOrchestrator;
pub use template::build_verification_pod;
pub use template::load_pod_template;
pub use template::PodParameters;

use crate::config::ValidatorConfig;
use crate::error::ValidatorError;
use crate::k8s::ClusterApi;

/// Manifest and app label of one kind of verification pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// File name under the manifests directory.
    pub manifest: &'static str,
    /// Value of the `app` label, used to find stale pods.
    pub app_label: &'static str,
}

pub const PLUGIN_WORKLOAD: WorkloadSpec = WorkloadSpec {
    manifest: "plugin-workload-validation.yaml",
    app_label: "nvidia-device-plugin-validator",
};

pub const CUDA_WORKLOAD: WorkloadSpec = WorkloadSpec {
    manifest: "cuda-workload-validation.yaml",
    app_label: "nvidia-cuda-validator",
};

/// Build the pod described by `spec` and run it to completion on the
/// configured node. `gpu_resource` is requested once by the init container.
pub async fn run_verification_pod(
    cluster: &dyn ClusterApi,
    config: &ValidatorConfig,
    spec: &WorkloadSpec,
    gpu_resource: Option<String>,
) -> Result<(), Report<ValidatorError>> {
    let namespace = config.namespace()?;
    let node_name = config.node_name()?;

    let template = load_pod_template(&config.manifests_dir.join(spec.manifest))?;
    let orchestrator = PodOrchestrator::new(cluster, namespace, node_name, config.pod_wait);
    let policy = orchestrator.inherited_policy().await?;

    let pod = build_verification_pod(
        template,
        &PodParameters {
            namespace: namespace.to_string(),
            node_name: node_name.to_string(),
            image: config.pod_image.clone(),
            owner_references: policy.owner_references,
            tolerations: policy.tolerations,
            gpu_resource,
        },
    )?;

    info!(app = %spec.app_label, node = %node_name, "running verification pod");
    orchestrator.run(&pod, spec.app_label).await
}
