//! GitOps handoff.
//!
//! Rewrites the configuration repository archive with the run's overrides,
//! pushes it into the in-cluster Gitea from a one-shot Job, registers the
//! repository with Argo CD and installs the `root-app` chart that owns all
//! further reconciliation.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::batch::v1::Job;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::wait::{self, WaitOptions};
use crate::cluster::{ClusterApi, SecretSpec, ARGOCD_NAMESPACE, GITEA_NAMESPACE};
use crate::config::overrides::ProfileOverrides;
use crate::config::InstallSettings;
use crate::error::{InstallError, Result};
use crate::process::{run_checked, CommandRunner, CommandSpec};
use crate::secrets::replace_secret;
use crate::stager::{find_repo_archive, REPO_ARCHIVE_NAME};

pub const GITEA_SERVICE: &str = "gitea-http";
pub const GITEA_SERVICE_HOST: &str = "gitea-http.gitea.svc.cluster.local";
pub const GITEA_CREDENTIAL_SECRET: &str = "argocd-gitea-credential";
pub const GITEA_TLS_SECRET: &str = "gitea-tls-certs";
pub const GIT_IMAGE: &str = "alpine/git:2.43.0";
pub const ROOT_APP: &str = "root-app";
pub const ROOT_APP_NAMESPACE: &str = "onprem";
pub const REPO_SECRET_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Working tree location under `repo_archives/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub work_root: PathBuf,
    pub tree: PathBuf,
}

impl RepoLayout {
    #[must_use]
    pub fn new(settings: &InstallSettings) -> Self {
        let work_root = settings.archives_dir().join("tmp");
        let tree = work_root.join(REPO_ARCHIVE_NAME);
        Self { work_root, tree }
    }

    /// Cluster profile inside a tree rooted at `tree`.
    #[must_use]
    pub fn profile_in(tree: &Path, profile: &str) -> PathBuf {
        tree.join("orch-configs")
            .join("clusters")
            .join(format!("{profile}.yaml"))
    }

    /// Whether a tree from an earlier `--write-config` run is present.
    #[must_use]
    pub fn has_existing_tree(&self) -> bool {
        self.tree.is_dir()
    }
}

/// How to obtain the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSource {
    /// Remove any existing tree and extract the staged archive.
    Extract,
    /// Keep the tree left by an earlier run.
    Reuse,
}

/// Result of [`materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Rewritten repository archive.
    pub archive: PathBuf,
    /// Tree kept on disk for manual editing, when requested.
    pub kept_tree: Option<PathBuf>,
}

/// Extract the staged repository archive, apply `overrides` to the active
/// profile and write the archive back in place.
///
/// With `keep_tree` the archive is left untouched and the edited tree stays
/// under `repo_archives/tmp` for manual changes.
///
/// # Errors
///
/// [`InstallError::ArtifactMissing`] if no archive is staged,
/// [`InstallError::LocalIo`] for file-system failures, and
/// [`InstallError::ConfigInvalid`] if the profile is not YAML.
pub fn materialize(
    settings: &InstallSettings,
    overrides: &ProfileOverrides,
    source: TreeSource,
    keep_tree: bool,
) -> Result<Materialized> {
    let archives_dir = settings.archives_dir();
    let archive = find_repo_archive(&archives_dir).ok_or_else(|| {
        InstallError::ArtifactMissing(format!(
            "{}/*{REPO_ARCHIVE_NAME}*.tgz",
            archives_dir.display()
        ))
    })?;
    let layout = RepoLayout::new(settings);

    match source {
        TreeSource::Reuse if layout.has_existing_tree() => {
            info!(tree = %layout.tree.display(), "Reusing existing working tree");
        }
        _ => {
            remove_dir_if_exists(&layout.work_root)?;
            std::fs::create_dir_all(&layout.work_root)
                .map_err(|e| InstallError::io(&layout.work_root, e))?;
            extract_archive(&archive, &layout.work_root)?;
        }
    }

    let profile = RepoLayout::profile_in(&layout.tree, &settings.profile);
    overrides.apply_to_file(&profile)?;

    if keep_tree {
        info!(tree = %layout.tree.display(), "Working tree kept for editing");
        return Ok(Materialized {
            archive,
            kept_tree: Some(layout.tree),
        });
    }

    let file_name = archive
        .file_name()
        .map_or_else(|| PathBuf::from(format!("{REPO_ARCHIVE_NAME}.tgz")), PathBuf::from);
    let packed = layout.work_root.join(file_name);
    pack_tree(&layout.tree, REPO_ARCHIVE_NAME, &packed)?;
    std::fs::rename(&packed, &archive).map_err(|e| InstallError::io(&archive, e))?;
    remove_dir_if_exists(&layout.work_root)?;

    info!(archive = %archive.display(), "Repository archive rewritten");
    Ok(Materialized {
        archive,
        kept_tree: None,
    })
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(dir, e)),
    }
}

/// Unpack a `.tgz` into `dest`.
///
/// # Errors
///
/// Returns [`InstallError::LocalIo`] if the archive cannot be read or unpacked.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| InstallError::io(archive, e))?;
    let mut unpacker = tar::Archive::new(GzDecoder::new(file));
    unpacker.unpack(dest).map_err(|e| InstallError::io(archive, e))?;
    debug!(archive = %archive.display(), dest = %dest.display(), "Archive extracted");
    Ok(())
}

/// Pack `tree` as `<prefix>/...` into a gzipped tarball at `dest`.
///
/// # Errors
///
/// Returns [`InstallError::LocalIo`] if the tarball cannot be written.
pub fn pack_tree(tree: &Path, prefix: &str, dest: &Path) -> Result<()> {
    let file = File::create(dest).map_err(|e| InstallError::io(dest, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(prefix, tree)
        .map_err(|e| InstallError::io(tree, e))?;
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .and_then(|file| file.sync_all())
        .map_err(|e| InstallError::io(dest, e))?;
    Ok(())
}

/// In-cluster Gitea host, with the port unless it is 443.
#[must_use]
pub fn gitea_host(port: i32) -> String {
    if port == 443 {
        GITEA_SERVICE_HOST.to_string()
    } else {
        format!("{GITEA_SERVICE_HOST}:{port}")
    }
}

/// Name of the push Job for `repo`.
#[must_use]
pub fn push_job_name(repo: &str) -> String {
    format!("gitea-init-{repo}")
}

/// Shell script the push Job runs inside the Git container.
fn push_script(gitea_host: &str, repo: &str) -> String {
    [
        "git config --global credential.helper store".to_string(),
        "git config --global user.email $GITEA_USERNAME@orch-installer.com".to_string(),
        "git config --global user.name $GITEA_USERNAME".to_string(),
        "git config --global http.sslCAInfo /usr/local/share/ca-certificates/tls.crt".to_string(),
        "git config --global --add safe.directory /repo".to_string(),
        format!("echo \"https://$GITEA_USERNAME:$GITEA_PASSWORD@{gitea_host}\" > /root/.git-credentials"),
        "cd /repo".to_string(),
        "git init".to_string(),
        format!("git remote add gitea https://{gitea_host}/$GITEA_USERNAME/{repo}.git"),
        "git checkout -B main".to_string(),
        "git add .".to_string(),
        "git commit --allow-empty -m 'Recreate repo from artifact'".to_string(),
        "git push --force gitea main".to_string(),
    ]
    .join(";\n")
}

/// Job that force-pushes the tree at `repo_dir` (a host path) to Gitea.
///
/// # Errors
///
/// Returns an error if the manifest does not deserialize into a Job.
pub fn build_push_job(
    repo: &str,
    repo_dir: &Path,
    gitea_host: &str,
    image_registry: &str,
) -> anyhow::Result<Job> {
    let secret_env = |name: &str, key: &str| {
        json!({
            "name": name,
            "valueFrom": { "secretKeyRef": { "name": GITEA_CREDENTIAL_SECRET, "key": key } }
        })
    };

    let job = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": push_job_name(repo),
            "namespace": GITEA_NAMESPACE,
            "labels": { "managed-by": REPO_ARCHIVE_NAME }
        },
        "spec": {
            "backoffLimit": 5,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "volumes": [
                        { "name": "tea", "hostPath": { "path": "/usr/bin/tea" } },
                        { "name": "repo", "hostPath": { "path": repo_dir.to_string_lossy() } },
                        { "name": "tls", "secret": { "secretName": GITEA_TLS_SECRET } }
                    ],
                    "containers": [{
                        "name": "git",
                        "image": format!("{}/{GIT_IMAGE}", image_registry.trim_end_matches('/')),
                        "env": [
                            secret_env("GITEA_USERNAME", "username"),
                            secret_env("GITEA_PASSWORD", "password")
                        ],
                        "command": ["/bin/sh", "-c"],
                        "args": [push_script(gitea_host, repo)],
                        "volumeMounts": [
                            { "name": "tea", "mountPath": "/usr/bin/tea" },
                            { "name": "repo", "mountPath": "/repo" },
                            { "name": "tls", "mountPath": "/usr/local/share/ca-certificates/" }
                        ]
                    }]
                }
            }
        }
    });

    Ok(serde_json::from_value(job)?)
}

/// Argo CD repository secret pointing at the Gitea copy of `repo`.
#[must_use]
pub fn repo_secret(repo: &str, gitea_host: &str, username: &str, password: &str) -> SecretSpec {
    SecretSpec::new(ARGOCD_NAMESPACE, repo)
        .with_label(REPO_SECRET_LABEL, "repository")
        .with_data("type", "git")
        .with_data("url", format!("https://{gitea_host}/{username}/{repo}"))
        .with_data("username", username)
        .with_data("password", password)
}

/// What the handoff registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    pub gitea_host: String,
    /// Namespace holding the `root-app` Application.
    pub application_namespace: String,
}

/// Polling for the push Job.
pub const JOB_WAIT: WaitOptions = WaitOptions::new(Duration::from_secs(5), wait::JOB_TIMEOUT);
/// Polling for `root-app` to be registered after helm returns.
pub const APPLICATION_WAIT: WaitOptions =
    WaitOptions::new(Duration::from_secs(2), Duration::from_secs(120));

/// Pushes the materialized repository and installs the root application.
pub struct GitOpsHandoff<'a> {
    api: &'a dyn ClusterApi,
    runner: &'a dyn CommandRunner,
    settings: &'a InstallSettings,
    cancel: CancellationToken,
    job_wait: WaitOptions,
    app_wait: WaitOptions,
}

impl<'a> GitOpsHandoff<'a> {
    #[must_use]
    pub fn new(
        api: &'a dyn ClusterApi,
        runner: &'a dyn CommandRunner,
        settings: &'a InstallSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            runner,
            settings,
            cancel,
            job_wait: JOB_WAIT,
            app_wait: APPLICATION_WAIT,
        }
    }

    #[must_use]
    pub fn with_waits(mut self, job_wait: WaitOptions, app_wait: WaitOptions) -> Self {
        self.job_wait = job_wait;
        self.app_wait = app_wait;
        self
    }

    /// Push `archive` to Gitea, register it with Argo CD and install `root-app`.
    ///
    /// # Errors
    ///
    /// [`InstallError::GitPushFailed`] if the push Job fails or times out,
    /// [`InstallError::SecretWriteFailed`] for the repository secret,
    /// [`InstallError::RootAppInstallFailed`] if helm fails or the
    /// Application never appears, and [`InstallError::PipelineAborted`] on
    /// cancellation.
    pub async fn run(&self, archive: &Path) -> Result<HandoffReport> {
        let deploy_dir = tempfile::Builder::new()
            .prefix(REPO_ARCHIVE_NAME)
            .tempdir_in(&self.settings.work_dir)
            .map_err(|e| InstallError::io(&self.settings.work_dir, e))?;
        let root = std::fs::canonicalize(deploy_dir.path())
            .map_err(|e| InstallError::io(deploy_dir.path(), e))?;
        extract_archive(archive, &root)?;
        let tree = root.join(REPO_ARCHIVE_NAME);

        let gitea_host = self.gitea_host().await?;
        self.push(&tree, &gitea_host).await?;
        self.register_repo(&gitea_host).await?;
        self.install_root_app(&tree).await?;
        let application_namespace = self.wait_for_root_app().await?;

        Ok(HandoffReport {
            gitea_host,
            application_namespace,
        })
    }

    async fn gitea_host(&self) -> Result<String> {
        let port = self
            .api
            .service_port(GITEA_NAMESPACE, GITEA_SERVICE)
            .await
            .map_err(|e| InstallError::GitPushFailed(format!("reading Gitea service: {e:#}")))?
            .ok_or_else(|| {
                InstallError::GitPushFailed(format!("service {GITEA_NAMESPACE}/{GITEA_SERVICE} not found"))
            })?;
        let host = gitea_host(port);
        debug!(host = %host, "Resolved Gitea host");
        Ok(host)
    }

    /// Force-push the tree through a fresh Job and wait for it.
    async fn push(&self, tree: &Path, gitea_host: &str) -> Result<()> {
        let name = push_job_name(REPO_ARCHIVE_NAME);
        let job = build_push_job(
            REPO_ARCHIVE_NAME,
            tree,
            gitea_host,
            &self.settings.gitea_image_registry,
        )
        .map_err(|e| InstallError::GitPushFailed(format!("building job: {e:#}")))?;

        self.api
            .delete_job(GITEA_NAMESPACE, &name)
            .await
            .map_err(|e| InstallError::GitPushFailed(format!("removing previous job: {e:#}")))?;
        self.api
            .create_job(&job)
            .await
            .map_err(|e| InstallError::GitPushFailed(format!("{e:#}")))?;

        info!(job = %name, "Waiting for repository push");
        wait::wait_for_job(self.api, GITEA_NAMESPACE, &name, self.job_wait, &self.cancel)
            .await
            .map_err(|e| match e {
                InstallError::ClusterWaitTimeout { .. } => InstallError::GitPushFailed(e.to_string()),
                other => other,
            })?;
        info!(repo = REPO_ARCHIVE_NAME, "Repository pushed to Gitea");
        Ok(())
    }

    async fn register_repo(&self, gitea_host: &str) -> Result<()> {
        let credential = |key: &'static str| async move {
            self.api
                .read_secret_key(GITEA_NAMESPACE, GITEA_CREDENTIAL_SECRET, key)
                .await
                .map_err(|e| InstallError::GitPushFailed(format!("reading Gitea credentials: {e:#}")))?
                .ok_or_else(|| {
                    InstallError::GitPushFailed(format!(
                        "{GITEA_NAMESPACE}/{GITEA_CREDENTIAL_SECRET} has no {key}"
                    ))
                })
        };
        let username = credential("username").await?;
        let password = credential("password").await?;

        replace_secret(
            self.api,
            &repo_secret(REPO_ARCHIVE_NAME, gitea_host, &username, &password),
        )
        .await?;
        info!(namespace = ARGOCD_NAMESPACE, "Repository credential registered");
        Ok(())
    }

    async fn install_root_app(&self, tree: &Path) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::PipelineAborted);
        }

        let helm = CommandSpec::new("helm")
            .args(["upgrade", "--install", ROOT_APP])
            .path_arg(&tree.join("argocd").join(ROOT_APP))
            .arg("-f")
            .path_arg(&RepoLayout::profile_in(tree, &self.settings.profile))
            .args(["-n", ROOT_APP_NAMESPACE, "--create-namespace"])
            .env("KUBECONFIG", self.settings.kubeconfig.to_string_lossy());

        run_checked(self.runner, &helm)
            .await
            .map_err(|e| InstallError::RootAppInstallFailed(format!("{e:#}")))?;
        info!(release = ROOT_APP, namespace = ROOT_APP_NAMESPACE, "Root application installed");
        Ok(())
    }

    async fn wait_for_root_app(&self) -> Result<String> {
        wait::poll_until(
            "root-app registration",
            self.app_wait,
            &self.cancel,
            InstallError::RootAppInstallFailed,
            || async move {
                Ok(match self.api.application_namespace(ROOT_APP).await? {
                    Some(ns) => wait::Probe::Done(ns),
                    None => wait::Probe::Pending("not registered".to_string()),
                })
            },
        )
        .await
        .map_err(|e| match e {
            InstallError::ClusterWaitTimeout { .. } => InstallError::RootAppInstallFailed(e.to_string()),
            other => other,
        })
    }
}
