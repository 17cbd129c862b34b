//! Cluster access and bootstrap.
//!
//! [`ClusterApi`] is the narrow set of Kubernetes operations the installer
//! needs. [`client::KubeCluster`] implements it against a real API server;
//! tests use an in-memory fake. Wait primitives built on it live in
//! [`wait`], and the distribution and GitOps controller installs in
//! [`distro`].

pub mod client;
pub mod distro;
pub mod wait;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;

use crate::error::InstallError;

/// Namespaces seeded before any secret is written.
pub const ORCH_NAMESPACES: [&str; 13] = [
    "onprem",
    "orch-boots",
    "orch-database",
    "orch-platform",
    "orch-app",
    "orch-cluster",
    "orch-infra",
    "orch-sre",
    "orch-ui",
    "orch-secret",
    "orch-gateway",
    "orch-harbor",
    "cattle-system",
];

pub const GITEA_NAMESPACE: &str = "gitea";
pub const ARGOCD_NAMESPACE: &str = "argocd";

/// A secret the installer writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSpec {
    pub namespace: String,
    pub name: String,
    /// Secret type; `Opaque` when unset.
    pub type_: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub string_data: BTreeMap<String, String>,
}

impl SecretSpec {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_data.insert(key.into(), value.into());
        self
    }
}

/// Terminal or in-flight state of a Job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Not present.
    Missing,
    Running,
    Complete,
    /// Failed, with the condition message.
    Failed(String),
}

/// Ready count for non-job pods in a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodReadiness {
    pub ready: usize,
    pub total: usize,
}

impl PodReadiness {
    /// All pods ready, and at least one exists.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.total > 0 && self.ready == self.total
    }
}

/// Kubernetes operations used by the installer.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the namespace if absent; succeed if it already exists.
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// `status.phase` of a namespace, `None` if it does not exist.
    async fn namespace_phase(&self, name: &str) -> Result<Option<String>>;

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Delete a secret, ignoring not-found.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_secret(&self, secret: &SecretSpec) -> Result<()>;

    /// One decoded key of a secret, `None` if the secret or key is absent.
    async fn read_secret_key(&self, namespace: &str, name: &str, key: &str)
        -> Result<Option<String>>;

    /// Readiness of pods not owned by a Job.
    async fn pod_readiness(&self, namespace: &str) -> Result<PodReadiness>;

    /// Delete a Job and its pods, ignoring not-found.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn job_state(&self, namespace: &str, name: &str) -> Result<JobState>;

    /// First port of a Service, `None` if the service is absent.
    async fn service_port(&self, namespace: &str, name: &str) -> Result<Option<i32>>;

    /// Namespace of the Argo CD Application `name`, searching all namespaces.
    async fn application_namespace(&self, name: &str) -> Result<Option<String>>;
}

/// Opens a [`ClusterApi`] once a kubeconfig exists.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterApi>>;
}

/// Connects with kube-rs.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterApi>> {
        let cluster = client::KubeCluster::from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(cluster))
    }
}

/// Create every namespace in `names`; existing ones are left alone.
///
/// # Errors
///
/// Returns [`InstallError::ClusterBootstrap`] naming the failing namespace.
pub async fn seed_namespaces(api: &dyn ClusterApi, names: &[&str]) -> Result<(), InstallError> {
    for ns in names {
        api.ensure_namespace(ns).await.map_err(|e| {
            InstallError::ClusterBootstrap(format!("creating namespace {ns}: {e:#}"))
        })?;
        tracing::debug!(namespace = %ns, "Namespace ensured");
    }
    tracing::info!(count = names.len(), "Namespaces ready");
    Ok(())
}
