//! In-memory capabilities for driving the installer end to end.

#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use orch_installer::cluster::distro::ControllerWaits;
use orch_installer::cluster::wait::WaitOptions;
use orch_installer::cluster::{ClusterApi, ClusterConnector, JobState, PodReadiness, SecretSpec};
use orch_installer::config::settings::EnvOverlay;
use orch_installer::config::{Config, InstallSettings, PackageManifest, DEFAULT_ORCH_PASSWORD};
use orch_installer::gitops::{pack_tree, GITEA_CREDENTIAL_SECRET, ROOT_APP};
use orch_installer::host::HostPaths;
use orch_installer::orchestrator::{Capabilities, Installer, Outcome, PhaseError, Timings};
use orch_installer::process::{CommandOutput, CommandRunner, CommandSpec};
use orch_installer::stager::{PullError, Registry, REPO_ARCHIVE_NAME};
use orch_installer::state::{Phase, RetryConfig};
use orch_installer::wizard::Prompter;

/// Succeeds every command and records what ran.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.commands().iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let display = spec.display();
        self.calls.lock().unwrap().push(display.clone());
        if display.starts_with("id -") {
            return Ok(CommandOutput::ok("ops\n"));
        }
        Ok(CommandOutput::ok(""))
    }

    fn has_program(&self, _program: &str) -> bool {
        true
    }
}

/// Registry that materializes each pulled artifact as a local file.
pub struct StagingRegistry {
    /// Source tree packed into the repository archive on pull.
    tree: PathBuf,
    pub pulls: Mutex<Vec<String>>,
}

impl StagingRegistry {
    pub fn new(tree: &Path) -> Self {
        Self {
            tree: tree.to_path_buf(),
            pulls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Registry for StagingRegistry {
    async fn pull(&self, reference: &str, dest: &Path) -> Result<(), PullError> {
        self.pulls.lock().unwrap().push(reference.to_string());
        let (path, version) = reference.rsplit_once(':').unwrap();
        let name = path.rsplit('/').next().unwrap();
        let version = version.trim_start_matches('v');

        if path.contains("/orchestrator/") {
            let archive = dest.join(format!("{REPO_ARCHIVE_NAME}_{version}.tgz"));
            pack_tree(&self.tree, REPO_ARCHIVE_NAME, &archive).map_err(|e| PullError::Local(e.to_string()))
        } else {
            std::fs::write(dest.join(format!("{name}_{version}_amd64.deb")), "deb")
                .map_err(|e| PullError::Local(e.to_string()))
        }
    }
}

/// Registry whose every pull times out.
#[derive(Default)]
pub struct UnreachableRegistry {
    pub attempts: Mutex<u32>,
}

#[async_trait]
impl Registry for UnreachableRegistry {
    async fn pull(&self, _reference: &str, _dest: &Path) -> Result<(), PullError> {
        *self.attempts.lock().unwrap() += 1;
        Err(PullError::Transport("dial tcp: i/o timeout".to_string()))
    }
}

/// Kubernetes API held in memory.
#[derive(Default)]
pub struct MemoryCluster {
    pub namespaces: Mutex<BTreeMap<String, String>>,
    pub secrets: Mutex<BTreeMap<(String, String), SecretSpec>>,
    pub jobs: Mutex<BTreeSet<(String, String)>>,
    pub services: Mutex<BTreeMap<(String, String), i32>>,
    pub applications: Mutex<BTreeSet<(String, String)>>,
    /// Mutating calls in order.
    pub log: Mutex<Vec<String>>,
}

impl MemoryCluster {
    /// Cluster as the distribution and GitOps controller leave it.
    pub fn bootstrapped() -> Self {
        let cluster = Self::default();
        for ns in ["gitea", "argocd"] {
            cluster
                .namespaces
                .lock()
                .unwrap()
                .insert(ns.to_string(), "Active".to_string());
        }
        cluster
            .services
            .lock()
            .unwrap()
            .insert(("gitea".into(), "gitea-http".into()), 443);
        cluster.secrets.lock().unwrap().insert(
            ("gitea".into(), GITEA_CREDENTIAL_SECRET.into()),
            SecretSpec::new("gitea", GITEA_CREDENTIAL_SECRET)
                .with_data("username", "gitea_admin")
                .with_data("password", "pw"),
        );
        cluster
            .applications
            .lock()
            .unwrap()
            .insert(("onprem".into(), ROOT_APP.into()));
        cluster
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretSpec> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn ensure_namespace(&self, name: &str) -> anyhow::Result<()> {
        let created = self
            .namespaces
            .lock()
            .unwrap()
            .insert(name.to_string(), "Active".to_string())
            .is_none();
        if created {
            self.record(format!("create namespace {name}"));
        }
        Ok(())
    }

    async fn namespace_phase(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.namespaces.lock().unwrap().get(name).cloned())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> anyhow::Result<bool> {
        Ok(self.secret(namespace, name).is_some())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        self.record(format!("delete secret {namespace}/{name}"));
        Ok(())
    }

    async fn create_secret(&self, secret: &SecretSpec) -> anyhow::Result<()> {
        let key = (secret.namespace.clone(), secret.name.clone());
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            anyhow::bail!("secrets \"{}\" already exists", secret.name);
        }
        secrets.insert(key, secret.clone());
        drop(secrets);
        self.record(format!("create secret {}/{}", secret.namespace, secret.name));
        Ok(())
    }

    async fn read_secret_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .secret(namespace, name)
            .and_then(|s| s.string_data.get(key).cloned()))
    }

    async fn pod_readiness(&self, _namespace: &str) -> anyhow::Result<PodReadiness> {
        Ok(PodReadiness { ready: 1, total: 1 })
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        self.record(format!("delete job {namespace}/{name}"));
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> anyhow::Result<()> {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();
        self.jobs.lock().unwrap().insert((namespace.clone(), name.clone()));
        self.record(format!("create job {namespace}/{name}"));
        Ok(())
    }

    async fn job_state(&self, namespace: &str, name: &str) -> anyhow::Result<JobState> {
        let exists = self
            .jobs
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string()));
        Ok(if exists { JobState::Complete } else { JobState::Missing })
    }

    async fn service_port(&self, namespace: &str, name: &str) -> anyhow::Result<Option<i32>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .copied())
    }

    async fn application_namespace(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .applications
            .lock()
            .unwrap()
            .iter()
            .find(|(_, app)| app == name)
            .map(|(ns, _)| ns.clone()))
    }
}

pub struct MemoryConnector(pub Arc<MemoryCluster>);

#[async_trait]
impl ClusterConnector for MemoryConnector {
    async fn connect(&self, _kubeconfig: &Path) -> anyhow::Result<Arc<dyn ClusterApi>> {
        Ok(self.0.clone())
    }
}

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Yes(bool),
    Pick(usize),
    Picks(Vec<usize>),
}

/// Answers prompts from a queue; an empty queue is an error.
#[derive(Default)]
pub struct QueuedPrompter {
    replies: VecDeque<Reply>,
    pub prompts: Vec<String>,
}

impl QueuedPrompter {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            prompts: Vec::new(),
        }
    }

    fn next(&mut self, prompt: &str) -> anyhow::Result<Reply> {
        self.prompts.push(prompt.to_string());
        self.replies
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply for {prompt:?}"))
    }
}

impl Prompter for QueuedPrompter {
    fn input(&mut self, prompt: &str, _initial: &str) -> anyhow::Result<String> {
        match self.next(prompt)? {
            Reply::Text(s) => Ok(s),
            other => anyhow::bail!("expected text for {prompt:?}, got {other:?}"),
        }
    }

    fn password(&mut self, prompt: &str) -> anyhow::Result<String> {
        self.input(prompt, "")
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> anyhow::Result<bool> {
        match self.next(prompt)? {
            Reply::Yes(b) => Ok(b),
            other => anyhow::bail!("expected yes/no for {prompt:?}, got {other:?}"),
        }
    }

    fn select(&mut self, prompt: &str, _items: &[String], _default: usize) -> anyhow::Result<usize> {
        match self.next(prompt)? {
            Reply::Pick(i) => Ok(i),
            other => anyhow::bail!("expected a choice for {prompt:?}, got {other:?}"),
        }
    }

    fn multi_select(
        &mut self,
        prompt: &str,
        _items: &[String],
        _checked: &[bool],
    ) -> anyhow::Result<Vec<usize>> {
        match self.next(prompt)? {
            Reply::Picks(v) => Ok(v),
            other => anyhow::bail!("expected choices for {prompt:?}, got {other:?}"),
        }
    }
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

/// A valid on-prem document.
pub fn onprem_config() -> Config {
    let mut config = Config::new();
    config.global.orch_name = "demo".into();
    config.global.parent_domain = "example.com".into();
    config.global.admin_email = "a@b.c".into();
    config.onprem.argo_ip = "10.0.0.1".into();
    config.onprem.traefik_ip = "10.0.0.2".into();
    config.onprem.nginx_ip = "10.0.0.3".into();
    config.orch.enabled = ["fps", "ui", "eim"].iter().map(|s| (*s).to_string()).collect();
    config.orch.default_password = DEFAULT_ORCH_PASSWORD.to_string();
    config
}

/// A host in a temp directory with a bootstrapped in-memory cluster.
pub struct Site {
    pub dir: TempDir,
    pub settings: InstallSettings,
    pub manifest: PackageManifest,
    pub runner: RecordingRunner,
    pub cluster: Arc<MemoryCluster>,
    /// Source of the repository archive.
    pub repo_src: PathBuf,
}

impl Site {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let settings = InstallSettings {
            config_path: dir.path().join("onprem-config.yaml"),
            work_dir: dir.path().to_path_buf(),
            kubeconfig: dir.path().join(".kube/config"),
            ..InstallSettings::default()
        };

        let repo_src = dir.path().join("src");
        std::fs::create_dir_all(repo_src.join("orch-configs/clusters")).unwrap();
        std::fs::create_dir_all(repo_src.join("argocd/root-app")).unwrap();
        std::fs::write(repo_src.join("orch-configs/clusters/onprem.yaml"), "argo: {}\n").unwrap();

        Self {
            dir,
            settings,
            manifest: PackageManifest::embedded().unwrap(),
            runner: RecordingRunner::default(),
            cluster: Arc::new(MemoryCluster::bootstrapped()),
            repo_src,
        }
    }

    pub fn write_config(&self, config: &Config) {
        std::fs::write(&self.settings.config_path, serde_yaml::to_string(config).unwrap()).unwrap();
    }

    pub fn config_text(&self) -> Option<String> {
        std::fs::read_to_string(&self.settings.config_path).ok()
    }

    fn host_paths(&self) -> HostPaths {
        HostPaths {
            sysctl_conf: self.dir.path().join("sysctl.conf"),
            modules_load: self.dir.path().join("modules-load.d/lv.conf"),
            hostpath_dirs: vec![self.dir.path().join("openebs")],
            bin_dir: self.dir.path().join("bin"),
        }
    }

    fn timings(attempts: u32) -> Timings {
        let fast = WaitOptions::new(Duration::from_millis(5), Duration::from_millis(200));
        Timings {
            registry_retry: RetryConfig::immediate(attempts),
            controller: ControllerWaits {
                namespace: fast,
                settle: Duration::ZERO,
                pods: fast,
            },
            push_job: fast,
            root_app: fast,
        }
    }

    /// Run every phase with `registry` and `prompter`.
    pub async fn install(
        &self,
        settings: &InstallSettings,
        registry: &dyn Registry,
        prompter: &mut QueuedPrompter,
    ) -> (Result<Outcome, PhaseError>, Vec<Phase>) {
        let connector = MemoryConnector(self.cluster.clone());
        let caps = Capabilities {
            runner: &self.runner,
            registry,
            connector: &connector,
            prompter,
        };
        let mut installer = Installer::new(
            settings,
            &self.manifest,
            EnvOverlay::default(),
            caps,
            CancellationToken::new(),
        )
        .with_host_paths(self.host_paths())
        .with_timings(Self::timings(10));
        let result = installer.run().await;
        (result, installer.state().completed.clone())
    }
}
