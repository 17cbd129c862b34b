//! [`ClusterApi`] over kube-rs.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, PostParams, PropagationPolicy};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, info};

use super::{ClusterApi, JobState, PodReadiness, SecretSpec};

/// How long `delete_job` waits for the Job object to disappear.
const JOB_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// Argo CD Application API resource definition.
fn argocd_application_api() -> ApiResource {
    ApiResource {
        group: "argoproj.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Application".to_string(),
        plural: "applications".to_string(),
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

/// Kubernetes API client for the installer.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot be created.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig from {}", path.display()))?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to create Kubernetes config from kubeconfig")?;

        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        debug!(kubeconfig = %path.display(), "Kubernetes client ready");

        Ok(Self { client })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Classify a Job from its status conditions.
fn job_state_of(job: &Job) -> JobState {
    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for condition in conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return JobState::Complete,
            "Failed" => {
                let reason = condition
                    .message
                    .clone()
                    .or_else(|| condition.reason.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                return JobState::Failed(reason);
            }
            _ => {}
        }
    }
    JobState::Running
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };

        debug!(namespace = %name, "Creating namespace");
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %name, "Created namespace");
                Ok(())
            }
            Err(e) if is_status(&e, 409) => {
                debug!(namespace = %name, "Namespace already exists");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create namespace {name}")),
        }
    }

    async fn namespace_phase(&self, name: &str) -> Result<Option<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get namespace {name}"))?;
        Ok(ns.map(|ns| {
            ns.status
                .and_then(|s| s.phase)
                .unwrap_or_else(|| "Unknown".to_string())
        }))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let found = self
            .secrets(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get secret {namespace}/{name}"))?;
        Ok(found.is_some())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        debug!(namespace = %namespace, secret = %name, "Deleting secret");
        match self.secrets(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete secret {namespace}/{name}")),
        }
    }

    async fn create_secret(&self, spec: &SecretSpec) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                namespace: Some(spec.namespace.clone()),
                labels: (!spec.labels.is_empty()).then(|| spec.labels.clone()),
                ..ObjectMeta::default()
            },
            type_: spec.type_.clone(),
            string_data: Some(spec.string_data.clone()),
            ..Secret::default()
        };

        debug!(namespace = %spec.namespace, secret = %spec.name, "Creating secret");
        self.secrets(&spec.namespace)
            .create(&PostParams::default(), &secret)
            .await
            .with_context(|| format!("Failed to create secret {}/{}", spec.namespace, spec.name))?;
        Ok(())
    }

    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str) -> Result<Option<String>> {
        let secret = self
            .secrets(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get secret {namespace}/{name}"))?;

        let Some(bytes) = secret.and_then(|s| s.data).and_then(|mut d| d.remove(key)) else {
            return Ok(None);
        };
        let value = String::from_utf8(bytes.0)
            .with_context(|| format!("Secret {namespace}/{name} key {key} is not UTF-8"))?;
        Ok(Some(value))
    }

    async fn pod_readiness(&self, namespace: &str) -> Result<PodReadiness> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels("!job-name"))
            .await
            .with_context(|| format!("Failed to list pods in {namespace}"))?;

        let total = pods.items.len();
        let ready = pods.items.iter().filter(|p| pod_is_ready(p)).count();
        debug!(namespace = %namespace, ready, total, "Pod readiness");
        Ok(PodReadiness { ready, total })
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let jobs = self.jobs(namespace);
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        debug!(namespace = %namespace, job = %name, "Deleting job");
        match jobs.delete(name, &params).await {
            Ok(_) => {}
            Err(e) if is_status(&e, 404) => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to delete job {namespace}/{name}"))
            }
        }

        // Recreating under the same name conflicts until the old object is gone
        let start = Instant::now();
        while jobs.get_opt(name).await?.is_some() {
            if start.elapsed() > JOB_DELETE_TIMEOUT {
                anyhow::bail!("Job {namespace}/{name} still terminating after {JOB_DELETE_TIMEOUT:?}");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or("default");
        let name = job.metadata.name.as_deref().unwrap_or_default();
        debug!(namespace = %namespace, job = %name, "Creating job");
        self.jobs(namespace)
            .create(&PostParams::default(), job)
            .await
            .with_context(|| format!("Failed to create job {namespace}/{name}"))?;
        Ok(())
    }

    async fn job_state(&self, namespace: &str, name: &str) -> Result<JobState> {
        let job = self
            .jobs(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get job {namespace}/{name}"))?;
        Ok(job.as_ref().map_or(JobState::Missing, job_state_of))
    }

    async fn service_port(&self, namespace: &str, name: &str) -> Result<Option<i32>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get service {namespace}/{name}"))?;
        Ok(svc
            .and_then(|s| s.spec)
            .and_then(|spec| spec.ports)
            .and_then(|ports| ports.first().map(|p| p.port)))
    }

    async fn application_namespace(&self, name: &str) -> Result<Option<String>> {
        let ar = argocd_application_api();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let apps = api
            .list(&ListParams::default().fields(&format!("metadata.name={name}")))
            .await
            .context("Failed to list ArgoCD applications")?;
        Ok(apps.items.into_iter().find_map(|app| app.metadata.namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn job_with(conditions: Vec<JobCondition>) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(conditions),
                ..JobStatus::default()
            }),
            ..Job::default()
        }
    }

    fn condition(type_: &str, status: &str, message: Option<&str>) -> JobCondition {
        JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            message: message.map(str::to_string),
            ..JobCondition::default()
        }
    }

    #[test]
    fn test_job_without_status_is_running() {
        assert_eq!(job_state_of(&Job::default()), JobState::Running);
    }

    #[test]
    fn test_job_complete_condition() {
        let job = job_with(vec![condition("Complete", "True", None)]);
        assert_eq!(job_state_of(&job), JobState::Complete);
    }

    #[test]
    fn test_job_failed_condition_carries_message() {
        let job = job_with(vec![
            condition("Complete", "False", None),
            condition("Failed", "True", Some("Job has reached the specified backoff limit")),
        ]);
        assert_eq!(
            job_state_of(&job),
            JobState::Failed("Job has reached the specified backoff limit".into())
        );
    }

    #[test]
    fn test_pod_ready_condition() {
        let pod = Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".into(),
                    status: "True".into(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        assert!(pod_is_ready(&pod));
        assert!(!pod_is_ready(&Pod::default()));
    }

    #[test]
    fn test_application_resource() {
        let ar = argocd_application_api();
        assert_eq!(ar.api_version, "argoproj.io/v1alpha1");
        assert_eq!(ar.plural, "applications");
    }
}
