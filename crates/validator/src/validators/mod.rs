//! Component validators and the protocol they share.
//!
//! Every component goes through the same phases: decide whether it applies
//! to this node, clear its markers, probe readiness, optionally run a
//! verification workload, and publish exactly one marker. A failure in any
//! phase leaves the markers cleared.

mod cc_manager;
mod driver;
mod kernel_modules;
mod sandbox;
mod toolkit;
mod workloads;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Node;
use tokio::sync::OnceCell;
use tracing::error;
use tracing::info;

pub use cc_manager::CcManagerValidator;
pub use driver::DriverValidator;
pub use kernel_modules::MofedValidator;
pub use kernel_modules::NvidiaFsValidator;
pub use sandbox::VfioPciValidator;
pub use sandbox::VgpuDevicesValidator;
pub use sandbox::VgpuManagerValidator;
pub use toolkit::ToolkitValidator;
pub use workloads::CudaValidator;
pub use workloads::PluginValidator;

use crate::component::Component;
use crate::config::ValidatorConfig;
use crate::error::ValidatorError;
use crate::k8s::init_kube_client;
use crate::k8s::ClusterApi;
use crate::k8s::ClusterError;
use crate::k8s::KubeCluster;
use crate::probe::ProbeExecutor;
use crate::status::StatusFile;
use crate::status::StatusLedger;
use crate::workload_config::classify;
use crate::workload_config::WorkloadConfig;

type ConnectFn =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn ClusterApi>, Report<ClusterError>>> + Send + Sync>;

/// Everything a validator needs for one run.
///
/// The cluster connection is only established the first time a validator
/// asks for it, so components that never talk to the API server do not need
/// credentials.
pub struct ValidationContext {
    pub config: ValidatorConfig,
    pub ledger: StatusLedger,
    pub executor: ProbeExecutor,
    cluster: OnceCell<Arc<dyn ClusterApi>>,
    connect: ConnectFn,
}

impl ValidationContext {
    /// Context connecting to the cluster described by `config.kubeconfig`.
    pub fn new(config: ValidatorConfig, executor: ProbeExecutor) -> Self {
        let kubeconfig = config.kubeconfig.clone();
        let connect: ConnectFn = Box::new(move || {
            let kubeconfig = kubeconfig.clone();
            async move {
                let client = init_kube_client(kubeconfig.as_deref()).await?;
                Ok::<_, Report<ClusterError>>(Arc::new(KubeCluster::new(client)) as Arc<dyn ClusterApi>)
            }
            .boxed()
        });

        Self {
            ledger: StatusLedger::new(&config.output_dir),
            config,
            executor,
            cluster: OnceCell::new(),
            connect,
        }
    }

    /// Context using an already constructed cluster client.
    pub fn with_cluster(
        config: ValidatorConfig,
        executor: ProbeExecutor,
        cluster: Arc<dyn ClusterApi>,
    ) -> Self {
        let connect: ConnectFn = Box::new(|| {
            async {
                Err::<Arc<dyn ClusterApi>, _>(Report::new(ClusterError::ConnectionFailed {
                    message: "cluster client already provided".to_string(),
                }))
            }
            .boxed()
        });

        Self {
            ledger: StatusLedger::new(&config.output_dir),
            config,
            executor,
            cluster: OnceCell::new_with(Some(cluster)),
            connect,
        }
    }

    pub async fn cluster(&self) -> Result<&dyn ClusterApi, Report<ValidatorError>> {
        let cluster = self
            .cluster
            .get_or_try_init(|| (self.connect)())
            .await
            .change_context(ValidatorError::Environment {
                message: "unable to create Kubernetes client".to_string(),
            })?;
        Ok(cluster.as_ref())
    }

    /// The node this validator runs on.
    pub async fn node(&self) -> Result<Node, Report<ValidatorError>> {
        let name = self.config.node_name()?;
        self.cluster()
            .await?
            .get_node(name)
            .await
            .change_context(ValidatorError::Environment {
                message: format!("unable to fetch node by name {name}"),
            })
    }

    pub async fn node_labels(&self) -> Result<BTreeMap<String, String>, Report<ValidatorError>> {
        Ok(self.node().await?.metadata.labels.unwrap_or_default())
    }

    /// Classify the node and record the result in the `workload-type` marker.
    pub async fn resolve_workload_config(&self) -> Result<WorkloadConfig, Report<ValidatorError>> {
        let labels = self.node_labels().await?;
        let config = classify(&labels, self.config.default_workload_config);
        info!("GPU workload configuration: {config}");

        self.ledger
            .publish_with_content(StatusFile::WorkloadType, &format!("{config}\n"))?;
        Ok(config)
    }

    /// [`Precheck::Applies`] only when the node runs in `required` mode.
    /// The workload type is recorded either way.
    pub async fn require_workload_config(
        &self,
        required: WorkloadConfig,
        subject: &str,
    ) -> Result<Precheck, Report<ValidatorError>> {
        let config = self.resolve_workload_config().await?;
        if config == required {
            return Ok(Precheck::Applies);
        }
        Ok(Precheck::Skip(format!(
            "{subject} not required on the node with workload config {config}"
        )))
    }
}

/// Outcome of the gate that runs before anything is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Applies,
    /// The component is irrelevant on this node. Not a failure.
    Skip(String),
}

/// Component specific phases of a validation run.
#[async_trait]
pub trait Validator: Send + Sync {
    fn component(&self) -> Component;

    async fn precheck(&self, _ctx: &ValidationContext) -> Result<Precheck, Report<ValidatorError>> {
        Ok(Precheck::Applies)
    }

    /// Check readiness and return the marker to publish on success.
    async fn probe(&self, ctx: &ValidationContext) -> Result<StatusFile, Report<ValidatorError>>;

    /// Verification workload, run only when workloads are enabled.
    async fn workload(&self, _ctx: &ValidationContext) -> Result<(), Report<ValidatorError>> {
        Ok(())
    }
}

/// Drive `validator` through precheck, clear, probe, workload and publish.
#[tracing::instrument(skip_all, fields(component = %validator.component()))]
pub async fn run_protocol(
    validator: &dyn Validator,
    ctx: &ValidationContext,
) -> Result<(), Report<ValidatorError>> {
    let component = validator.component();

    if let Precheck::Skip(reason) = validator.precheck(ctx).await? {
        info!("{reason}, skipping validation");
        return Ok(());
    }

    for file in component.status_files() {
        ctx.ledger.clear(*file)?;
    }

    let marker = validator.probe(ctx).await.inspect_err(|_| {
        error!("{component} is not ready");
    })?;

    if ctx.config.with_workload {
        validator.workload(ctx).await?;
    }

    ctx.ledger.publish(marker)?;
    info!(marker = %marker, "validation completed successfully");
    Ok(())
}

/// Validator implementing `component`.
pub fn validator_for(component: Component) -> Result<Box<dyn Validator>, Report<ValidatorError>> {
    let validator: Box<dyn Validator> = match component {
        Component::Driver => Box::new(DriverValidator),
        Component::NvidiaFs => Box::new(NvidiaFsValidator),
        Component::Toolkit => Box::new(ToolkitValidator),
        Component::Cuda => Box::new(CudaValidator),
        Component::Plugin => Box::new(PluginValidator),
        Component::Mofed => Box::new(MofedValidator),
        Component::VfioPci => Box::new(VfioPciValidator),
        Component::VgpuManager => Box::new(VgpuManagerValidator),
        Component::VgpuDevices => Box::new(VgpuDevicesValidator),
        Component::CcManager => Box::new(CcManagerValidator),
        Component::Metrics => {
            return Err(Report::new(ValidatorError::InvalidConfig {
                message: "the metrics exporter is not supported by this binary".to_string(),
            }))
        }
    };
    Ok(validator)
}

/// Validate the configured component.
pub async fn dispatch(ctx: &ValidationContext) -> Result<(), Report<ValidatorError>> {
    let component = ctx.config.component;
    let result = match validator_for(component) {
        Ok(validator) => run_protocol(validator.as_ref(), ctx).await,
        Err(e) => Err(e),
    };
    result.change_context(ValidatorError::ValidationFailed {
        what: component.description(),
    })
}
