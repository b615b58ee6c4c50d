//! Verification pod templates and the pure transformation that turns a
//! template into the pod actually submitted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use crate::config::PodImageSettings;
use crate::error::ValidatorError;

/// Everything a template is parameterised with.
#[derive(Debug, Clone, Default)]
pub struct PodParameters {
    pub namespace: String,
    pub node_name: String,
    pub image: PodImageSettings,
    /// Copied from the validator DaemonSet so the pod is garbage collected
    /// with it.
    pub owner_references: Vec<OwnerReference>,
    /// Copied from the validator DaemonSet so the pod lands where it does.
    pub tolerations: Vec<Toleration>,
    /// GPU resource the first init container requests one unit of.
    pub gpu_resource: Option<String>,
}

/// Read and decode a pod manifest.
pub fn load_pod_template(path: &Path) -> Result<Pod, Report<ValidatorError>> {
    let manifest = fs::read_to_string(path)
        .change_context(ValidatorError::Template {
            message: "unable to read pod manifest".to_string(),
        })
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;

    debug!(path = %path.display(), "decoding pod manifest");
    serde_yaml::from_str(&manifest)
        .change_context(ValidatorError::Template {
            message: "unable to decode pod manifest".to_string(),
        })
        .attach_printable_lazy(|| format!("path: {}", path.display()))
}

fn apply_image(container: &mut Container, image: &PodImageSettings) {
    if let Some(name) = &image.image {
        container.image = Some(name.clone());
    }
    if let Some(policy) = &image.pull_policy {
        container.image_pull_policy = Some(policy.clone());
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Parameterise `template` for one validation run.
///
/// The template must have at least one container and one init container;
/// only the first of each is touched.
pub fn build_verification_pod(
    mut pod: Pod,
    params: &PodParameters,
) -> Result<Pod, Report<ValidatorError>> {
    let spec = pod.spec.as_mut().ok_or_else(|| {
        Report::new(ValidatorError::Template {
            message: "pod spec is missing".to_string(),
        })
    })?;

    let container = spec.containers.first_mut().ok_or_else(|| {
        Report::new(ValidatorError::Template {
            message: "pod has no containers".to_string(),
        })
    })?;
    apply_image(container, &params.image);

    let init_container = spec
        .init_containers
        .as_mut()
        .and_then(|containers| containers.first_mut())
        .ok_or_else(|| {
            Report::new(ValidatorError::Template {
                message: "pod has no init containers".to_string(),
            })
        })?;
    apply_image(init_container, &params.image);

    if let Some(resource) = &params.gpu_resource {
        let claim = BTreeMap::from([(resource.clone(), Quantity("1".to_string()))]);
        let resources = init_container
            .resources
            .get_or_insert_with(ResourceRequirements::default);
        resources.limits = Some(claim.clone());
        resources.requests = Some(claim);
    }

    if !params.image.pull_secrets.is_empty() {
        spec.image_pull_secrets
            .get_or_insert_with(Vec::new)
            .extend(params.image.pull_secrets.iter().map(|secret| LocalObjectReference {
                name: Some(secret.clone()),
            }));
    }
    if let Some(runtime_class) = &params.image.runtime_class {
        spec.runtime_class_name = Some(runtime_class.clone());
    }

    spec.tolerations = non_empty(params.tolerations.clone());
    spec.node_name = Some(params.node_name.clone());

    pod.metadata.namespace = Some(params.namespace.clone());
    pod.metadata.owner_references = non_empty(params.owner_references.clone());

    Ok(pod)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const PLUGIN_TEMPLATE: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  labels:
    app: nvidia-device-plugin-validator
  generateName: nvidia-device-plugin-validator-
spec:
  tolerations:
    - key: stale
      operator: Exists
  restartPolicy: OnFailure
  initContainers:
    - name: plugin-validation
      image: "FILLED_BY_VALIDATOR"
      command: ["sh", "-c"]
      args: ["vectorAdd"]
  containers:
    - name: nvidia-device-plugin-validator
      image: "FILLED_BY_VALIDATOR"
      command: ["sh", "-c"]
      args: ["echo device-plugin workload validation is successful"]
"#;

    fn template() -> Pod {
        serde_yaml::from_str(PLUGIN_TEMPLATE).unwrap()
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "nvidia.com/v1".to_string(),
            kind: "ClusterPolicy".to_string(),
            name: "cluster-policy".to_string(),
            uid: "6f1c8d4e".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn params() -> PodParameters {
        PodParameters {
            namespace: "gpu-operator".to_string(),
            node_name: "node-a".to_string(),
            image: PodImageSettings {
                image: Some("nvcr.io/nvidia/validator:v1".to_string()),
                pull_policy: Some("IfNotPresent".to_string()),
                pull_secrets: vec!["regcred".to_string(), "mirror".to_string()],
                runtime_class: Some("nvidia".to_string()),
            },
            owner_references: vec![owner()],
            tolerations: vec![Toleration {
                key: Some("nvidia.com/gpu".to_string()),
                operator: Some("Exists".to_string()),
                effect: Some("NoSchedule".to_string()),
                ..Toleration::default()
            }],
            gpu_resource: Some("nvidia.com/mig-1g.5gb".to_string()),
        }
    }

    #[test]
    fn build_applies_all_parameters() {
        let pod = build_verification_pod(template(), &params()).unwrap();

        assert_eq!(pod.metadata.namespace.as_deref(), Some("gpu-operator"));
        assert_eq!(pod.metadata.owner_references, Some(vec![owner()]));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-a"));
        assert_eq!(spec.runtime_class_name.as_deref(), Some("nvidia"));
        assert_eq!(
            spec.image_pull_secrets
                .unwrap()
                .into_iter()
                .map(|secret| secret.name.unwrap())
                .collect::<Vec<_>>(),
            vec!["regcred".to_string(), "mirror".to_string()]
        );

        let tolerations = spec.tolerations.unwrap();
        assert_eq!(tolerations.len(), 1);
        assert_eq!(tolerations[0].key.as_deref(), Some("nvidia.com/gpu"));

        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("nvcr.io/nvidia/validator:v1"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert!(container.resources.is_none());

        let init = &spec.init_containers.as_ref().unwrap()[0];
        assert_eq!(init.image.as_deref(), Some("nvcr.io/nvidia/validator:v1"));
        let resources = init.resources.as_ref().unwrap();
        let expected = BTreeMap::from([(
            "nvidia.com/mig-1g.5gb".to_string(),
            Quantity("1".to_string()),
        )]);
        assert_eq!(resources.limits.as_ref(), Some(&expected));
        assert_eq!(resources.requests.as_ref(), Some(&expected));
    }

    #[test]
    fn build_without_gpu_resource_or_image_keeps_template_values() {
        let params = PodParameters {
            namespace: "gpu-operator".to_string(),
            node_name: "node-a".to_string(),
            ..PodParameters::default()
        };
        let pod = build_verification_pod(template(), &params).unwrap();
        assert!(pod.metadata.owner_references.is_none());

        let spec = pod.spec.unwrap();
        assert!(spec.tolerations.is_none());
        assert!(spec.image_pull_secrets.is_none());
        assert_eq!(spec.containers[0].image.as_deref(), Some("FILLED_BY_VALIDATOR"));
        assert!(spec.init_containers.unwrap()[0].resources.is_none());
    }

    #[test]
    fn template_without_init_container_is_rejected() {
        let mut pod = template();
        pod.spec.as_mut().unwrap().init_containers = None;
        let err = build_verification_pod(pod, &params()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ValidatorError::Template { .. }
        ));
    }

    #[test]
    fn load_reads_manifest_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-workload-validation.yaml");
        fs::write(&path, PLUGIN_TEMPLATE).unwrap();

        let pod = load_pod_template(&path).unwrap();
        assert_eq!(
            pod.metadata.generate_name.as_deref(),
            Some("nvidia-device-plugin-validator-")
        );

        assert!(load_pod_template(&dir.path().join("missing.yaml")).is_err());

        fs::write(&path, "kind: [").unwrap();
        assert!(load_pod_template(&path).is_err());
    }
}
