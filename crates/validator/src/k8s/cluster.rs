use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::api::PropagationPolicy;
use kube::Api;
use kube::Client;

use crate::k8s::ClusterError;

/// Cluster API calls made by the validators.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Node, Report<ClusterError>>;

    /// Pods in `namespace` matching both selectors.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Report<ClusterError>>;

    /// Delete immediately, letting the garbage collector remove dependents in
    /// the background.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>>;

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSet, Report<ClusterError>>;
}

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_node(&self, name: &str) -> Result<Node, Report<ClusterError>> {
        Api::<Node>::all(self.client.clone())
            .get(name)
            .await
            .change_context(ClusterError::request(format!("get node {name}")))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>> {
        let params = ListParams::default()
            .labels(label_selector)
            .fields(field_selector);
        let list = self
            .pods(namespace)
            .list(&params)
            .await
            .change_context(ClusterError::request(format!(
                "list pods in {namespace} with labels {label_selector}"
            )))?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        self.pods(namespace)
            .get(name)
            .await
            .change_context(ClusterError::request(format!("get pod {namespace}/{name}")))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Report<ClusterError>> {
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .change_context(ClusterError::request(format!("create pod in {namespace}")))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>> {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Background),
            ..DeleteParams::default()
        };
        self.pods(namespace)
            .delete(name, &params)
            .await
            .change_context(ClusterError::request(format!(
                "delete pod {namespace}/{name}"
            )))?;
        Ok(())
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSet, Report<ClusterError>> {
        Api::<DaemonSet>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .change_context(ClusterError::request(format!(
                "get daemonset {namespace}/{name}"
            )))
    }
}
