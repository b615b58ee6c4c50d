use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::info;

use crate::config::WaitBudget;
use crate::error::ValidatorError;
use crate::k8s::ClusterApi;

/// DaemonSet running this validator; verification pods inherit its owner and
/// tolerations.
pub const VALIDATOR_DAEMONSET: &str = "nvidia-operator-validator";

const POD_SUCCEEDED: &str = "Succeeded";

/// Owner and placement policy verification pods inherit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InheritedPolicy {
    pub owner_references: Vec<OwnerReference>,
    pub tolerations: Vec<Toleration>,
}

fn lifecycle(message: impl Into<String>) -> ValidatorError {
    ValidatorError::PodLifecycle {
        message: message.into(),
    }
}

/// Runs one verification pod per (app label, node) to completion.
///
/// Any stale pod with the same label on the node is deleted first. This is
/// not transactional: two validators racing on one node can still overlap.
pub struct PodOrchestrator<'a> {
    cluster: &'a dyn ClusterApi,
    namespace: &'a str,
    node_name: &'a str,
    wait: WaitBudget,
}

impl<'a> PodOrchestrator<'a> {
    pub fn new(
        cluster: &'a dyn ClusterApi,
        namespace: &'a str,
        node_name: &'a str,
        wait: WaitBudget,
    ) -> Self {
        Self {
            cluster,
            namespace,
            node_name,
            wait,
        }
    }

    /// Owner references and tolerations of the validator DaemonSet.
    pub async fn inherited_policy(&self) -> Result<InheritedPolicy, Report<ValidatorError>> {
        let daemon_set = self
            .cluster
            .get_daemon_set(self.namespace, VALIDATOR_DAEMONSET)
            .await
            .change_context(lifecycle(
                "unable to read owner reference and tolerations for validator pod",
            ))?;

        Ok(InheritedPolicy {
            owner_references: daemon_set.metadata.owner_references.unwrap_or_default(),
            tolerations: daemon_set
                .spec
                .and_then(|spec| spec.template.spec)
                .and_then(|spec| spec.tolerations)
                .unwrap_or_default(),
        })
    }

    /// Delete every pod labelled `app=<app_label>` on this node. Returns how
    /// many were deleted.
    pub async fn reconcile(&self, app_label: &str) -> Result<usize, Report<ValidatorError>> {
        let label_selector = format!("app={app_label}");
        let field_selector = format!("spec.nodeName={}", self.node_name);

        let stale = self
            .cluster
            .list_pods(self.namespace, &label_selector, &field_selector)
            .await
            .change_context(lifecycle("cannot list existing validation pods"))?;

        let mut deleted = 0;
        for pod in &stale {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            info!(pod = %name, "deleting previous validation pod");
            self.cluster
                .delete_pod(self.namespace, name)
                .await
                .change_context(lifecycle(format!(
                    "cannot delete previous validation pod {name}"
                )))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Create `pod`, returning the name the API server gave it.
    pub async fn submit(&self, pod: &Pod) -> Result<String, Report<ValidatorError>> {
        let requested = pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();

        let created = self
            .cluster
            .create_pod(self.namespace, pod)
            .await
            .change_context(lifecycle(format!(
                "failed to create validation pod {requested}"
            )))?;

        created.metadata.name.ok_or_else(|| {
            Report::new(lifecycle(format!(
                "created validation pod {requested} has no name"
            )))
        })
    }

    /// Poll until the pod succeeds or the wait budget runs out. A failed
    /// lookup ends the wait immediately.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn await_completion(&self, name: &str) -> Result<(), Report<ValidatorError>> {
        for _ in 0..self.wait.retries {
            let pod = self
                .cluster
                .get_pod(self.namespace, name)
                .await
                .change_context(lifecycle(format!("failed to get pod {name}")))?;

            let phase = pod
                .status
                .and_then(|status| status.phase)
                .unwrap_or_default();
            if phase == POD_SUCCEEDED {
                info!("pod {name} have run successfully");
                return Ok(());
            }

            info!("pod {name} is currently in {phase} phase");
            tokio::time::sleep(self.wait.interval).await;
        }

        Err(Report::new(lifecycle(format!(
            "gave up waiting for pod {name} to be available"
        ))))
    }

    /// Supersede stale pods, create `pod` and wait for it to succeed.
    pub async fn run(&self, pod: &Pod, app_label: &str) -> Result<(), Report<ValidatorError>> {
        let deleted = self.reconcile(app_label).await?;
        if deleted > 0 {
            info!(app = %app_label, deleted, "removed stale validation pods");
        }

        let name = self.submit(pod).await?;
        self.await_completion(&name).await
    }
}
