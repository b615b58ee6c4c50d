use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::debug;

use crate::k8s::ClusterError;

/// Build a client from an explicit kubeconfig, or infer one (in-cluster
/// service account first, then `~/.kube/config`).
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<ClusterError>> {
    let config = match kubeconfig {
        Some(kubeconfig_path) => {
            debug!(path = %kubeconfig_path.display(), "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(kubeconfig_path).change_context(
                ClusterError::ConnectionFailed {
                    message: format!(
                        "Failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(ClusterError::ConnectionFailed {
                    message: format!(
                        "Failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })?
        }
        None => Config::infer()
            .await
            .change_context(ClusterError::ConnectionFailed {
                message: "Error getting cluster config".to_string(),
            })?,
    };

    Client::try_from(config).change_context(ClusterError::ConnectionFailed {
        message: "Error getting k8s client".to_string(),
    })
}
