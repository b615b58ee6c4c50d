#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::DaemonSetSpec;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use validator::component::Component;
use validator::config::HostPaths;
use validator::config::ValidatorConfig;
use validator::config::WaitBudget;
use validator::k8s::ClusterApi;
use validator::k8s::ClusterError;
use validator::probe::CommandRunner;
use validator::probe::Probe;
use validator::probe::ProbeExecutor;
use validator::validators::ValidationContext;

pub const NODE: &str = "node-a";
pub const NAMESPACE: &str = "gpu-operator";

pub const PLUGIN_MANIFEST: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  labels:
    app: nvidia-device-plugin-validator
  generateName: nvidia-device-plugin-validator-
spec:
  restartPolicy: OnFailure
  initContainers:
    - name: plugin-validation
      image: "FILLED_BY_VALIDATOR"
      command: ["vectorAdd"]
  containers:
    - name: nvidia-device-plugin-validator
      image: "FILLED_BY_VALIDATOR"
      command: ["sh", "-c", "echo device-plugin workload validation is successful"]
"#;

pub const CUDA_MANIFEST: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  labels:
    app: nvidia-cuda-validator
  generateName: nvidia-cuda-validator-
spec:
  restartPolicy: OnFailure
  initContainers:
    - name: cuda-validation
      image: "FILLED_BY_VALIDATOR"
      command: ["vectorAdd"]
  containers:
    - name: nvidia-cuda-validator
      image: "FILLED_BY_VALIDATOR"
      command: ["sh", "-c", "echo cuda workload validation is successful"]
"#;

/// In-memory cluster with just enough behaviour for the validators.
#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<ClusterState>,
}

#[derive(Default)]
pub struct ClusterState {
    pub node: Option<Node>,
    pub daemon_set: Option<DaemonSet>,
    pub pods: Vec<Pod>,
    /// Phase given to every created pod.
    pub created_phase: Option<String>,
    pub node_lookups: usize,
    pub created: Vec<Pod>,
    pub deleted: Vec<String>,
    next_pod: usize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClusterState {
                created_phase: Some("Succeeded".to_string()),
                ..ClusterState::default()
            }),
        })
    }

    pub fn with_node(node: Node) -> Arc<Self> {
        let cluster = Self::new();
        cluster.state.lock().unwrap().node = Some(node);
        cluster
    }

    pub fn node_lookups(&self) -> usize {
        self.state.lock().unwrap().node_lookups
    }

    pub fn created(&self) -> Vec<Pod> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

fn matches_selector(pod: &Pod, label_selector: &str, field_selector: &str) -> bool {
    let labels_match = label_selector.split(',').all(|term| {
        let Some((key, value)) = term.split_once('=') else {
            return false;
        };
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    });
    let node = field_selector.strip_prefix("spec.nodeName=").unwrap_or_default();
    let node_matches = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        == Some(node);
    labels_match && node_matches
}

fn not_found(what: String) -> Report<ClusterError> {
    Report::new(ClusterError::RequestFailed { operation: what })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_node(&self, name: &str) -> Result<Node, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.node_lookups += 1;
        state
            .node
            .clone()
            .filter(|node| node.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| not_found(format!("get node {name}")))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>, Report<ClusterError>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| matches_selector(pod, label_selector, field_selector))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        let state = self.state.lock().unwrap();
        state
            .pods
            .iter()
            .find(|pod| {
                pod.metadata.namespace.as_deref() == Some(namespace)
                    && pod.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| not_found(format!("get pod {namespace}/{name}")))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.next_pod += 1;

        let mut created = pod.clone();
        let name = match &pod.metadata.generate_name {
            Some(prefix) => format!("{prefix}{}", state.next_pod),
            None => pod.metadata.name.clone().unwrap_or_default(),
        };
        created.metadata.name = Some(name);
        created.metadata.namespace = Some(namespace.to_string());
        created.status = Some(PodStatus {
            phase: state.created_phase.clone(),
            ..PodStatus::default()
        });

        state.created.push(created.clone());
        state.pods.push(created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        let before = state.pods.len();
        state.pods.retain(|pod| {
            !(pod.metadata.namespace.as_deref() == Some(namespace)
                && pod.metadata.name.as_deref() == Some(name))
        });
        if state.pods.len() == before {
            return Err(not_found(format!("delete pod {namespace}/{name}")));
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSet, Report<ClusterError>> {
        let state = self.state.lock().unwrap();
        state
            .daemon_set
            .clone()
            .ok_or_else(|| not_found(format!("get daemonset {namespace}/{name}")))
    }
}

/// Records every probe and answers with a fixed outcome.
pub struct RecordingRunner {
    pub calls: Mutex<Vec<Probe>>,
    outcome: bool,
}

impl RecordingRunner {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome: true,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome: false,
        })
    }

    /// Probes rendered as command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, probe: &Probe, _silent: bool) -> io::Result<bool> {
        self.calls.lock().unwrap().push(probe.clone());
        Ok(self.outcome)
    }
}

pub fn labels(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub fn resources(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), Quantity(value.to_string())))
        .collect()
}

pub fn node(node_labels: &[(&str, &str)], capacity: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(NODE.to_string()),
            labels: Some(labels(node_labels)),
            ..ObjectMeta::default()
        },
        status: Some(NodeStatus {
            capacity: Some(resources(capacity)),
            allocatable: Some(resources(capacity)),
            ..NodeStatus::default()
        }),
        ..Node::default()
    }
}

pub fn owner_reference() -> OwnerReference {
    OwnerReference {
        api_version: "nvidia.com/v1".to_string(),
        kind: "ClusterPolicy".to_string(),
        name: "cluster-policy".to_string(),
        uid: "0b4fd4c8-55c8-4a55-bb36-5e6a2b6cc1d7".to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn validator_daemon_set() -> DaemonSet {
    DaemonSet {
        metadata: ObjectMeta {
            name: Some("nvidia-operator-validator".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            owner_references: Some(vec![owner_reference()]),
            ..ObjectMeta::default()
        },
        spec: Some(DaemonSetSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    tolerations: Some(vec![Toleration {
                        key: Some("nvidia.com/gpu".to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Toleration::default()
                    }]),
                    ..PodSpec::default()
                }),
                ..PodTemplateSpec::default()
            },
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    }
}

/// A scratch host: output directory, manifests and host mounts all live in
/// one temporary directory.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(sandbox.path("manifests")).unwrap();
        fs::write(
            sandbox.path("manifests/plugin-workload-validation.yaml"),
            PLUGIN_MANIFEST,
        )
        .unwrap();
        fs::write(
            sandbox.path("manifests/cuda-workload-validation.yaml"),
            CUDA_MANIFEST,
        )
        .unwrap();
        sandbox
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            host_root: self.path("host"),
            driver_container_root: self.path("run/nvidia/driver"),
            driver_host_root: PathBuf::from("/home/kubernetes/bin/nvidia"),
            host_dev_char: self.path("host-dev-char"),
            sysfs_root: self.path("sys"),
            driver_container_ready: self.path("validations/.driver-ctr-ready"),
            cc_manager_container_ready: self.path("validations/.cc-manager-ctr-ready"),
            mofed_driver_ready: self.path("run/mellanox/drivers/.driver-ready"),
        }
    }

    pub fn config(&self, component: Component) -> ValidatorConfig {
        let mut config = ValidatorConfig::new(component);
        config.node_name = Some(NODE.to_string());
        config.namespace = Some(NAMESPACE.to_string());
        config.output_dir = self.path("validations");
        config.manifests_dir = self.path("manifests");
        config.sleep_interval = Duration::from_millis(1);
        config.host_paths = self.host_paths();
        config.pod_wait = WaitBudget {
            retries: 3,
            interval: Duration::from_millis(1),
        };
        config.resource_wait = WaitBudget {
            retries: 3,
            interval: Duration::from_millis(1),
        };
        config
    }

    /// Context with a prepared output directory.
    pub fn context(
        &self,
        config: ValidatorConfig,
        runner: Arc<RecordingRunner>,
        cluster: Arc<FakeCluster>,
    ) -> ValidationContext {
        let executor = ProbeExecutor::new(runner, config.sleep_interval, CancellationToken::new());
        let ctx = ValidationContext::with_cluster(config, executor, cluster);
        ctx.ledger.prepare(false).unwrap();
        ctx
    }

    /// Non-empty `nvidia-smi` under the host root.
    pub fn install_host_driver(&self) {
        let bin = self.path("host/usr/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("nvidia-smi"), "#!/bin/sh\n").unwrap();
    }

    /// Driver container root that can be chrooted into.
    pub fn install_container_driver(&self) {
        fs::create_dir_all(self.path("run/nvidia/driver/dev")).unwrap();
    }

    /// Add a PCI function under the fake sysfs.
    pub fn add_pci_device(&self, address: &str, vendor: &str, class: &str, driver: &str) -> PathBuf {
        let sys = self.path("sys");
        let device = sys.join("devices/pci0000:00").join(address);
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(device.join("class"), format!("{class}\n")).unwrap();

        let driver_dir = sys.join("bus/pci/drivers").join(driver);
        fs::create_dir_all(&driver_dir).unwrap();
        symlink(&driver_dir, device.join("driver")).unwrap();

        let bus = sys.join("bus/pci/devices");
        fs::create_dir_all(&bus).unwrap();
        symlink(&device, bus.join(address)).unwrap();
        device
    }

    /// Add a mediated device whose parent is `parent`.
    pub fn add_mdev_device(&self, parent: &Path, uuid: &str) {
        let device = parent.join(uuid);
        fs::create_dir_all(&device).unwrap();
        let bus = self.path("sys/bus/mdev/devices");
        fs::create_dir_all(&bus).unwrap();
        symlink(&device, bus.join(uuid)).unwrap();
    }

    pub fn status_files(&self) -> Vec<String> {
        let mut names = fs::read_dir(self.path("validations"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
