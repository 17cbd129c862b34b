//! Artifact staging.
//!
//! Pulls installer bundles and repository archives from the release
//! registry into `installers/` and `repo_archives/` under the working
//! directory, then checks every required artifact is on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{InstallSettings, PackageManifest};
use crate::error::{InstallError, Result};
use crate::host::is_nonempty_file;
use crate::process::{run_checked, CommandRunner, CommandSpec};
use crate::state::RetryConfig;

/// Installer bundles every deployment needs, in install order.
pub const BASE_INSTALLERS: [&str; 3] = [
    "onprem-ke-installer",
    "onprem-argocd-installer",
    "onprem-orch-installer",
];
/// Repository archives every deployment needs.
pub const BASE_ARCHIVES: [&str; 1] = ["onpremfull"];
/// Name fragment of the configuration repository archive.
pub const REPO_ARCHIVE_NAME: &str = "edge-manageability-framework";
/// Owner the package manager expects on staged bundles.
const APT_OWNER: &str = "_apt:root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// Pull everything from the registry.
    Fetch,
    /// Trust the local layout and only verify it.
    AssumePresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Installer,
    Archive,
}

/// One registry artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Registry reference `base/path/name:version`.
    #[must_use]
    pub fn reference(&self, settings: &InstallSettings) -> String {
        let path = match self.kind {
            ArtifactKind::Installer => &settings.installer_path,
            ArtifactKind::Archive => &settings.archive_path,
        };
        format!(
            "{}/{}/{}:{}",
            settings.release_service_url.trim_end_matches('/'),
            path.trim_matches('/'),
            self.name,
            self.version
        )
    }
}

/// The artifacts one run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub installers: Vec<Artifact>,
    pub archives: Vec<Artifact>,
}

impl ArtifactSet {
    /// Base bundles plus any bundle declared by an enabled app.
    #[must_use]
    pub fn required(enabled: &BTreeSet<String>, manifest: &PackageManifest, version: &str) -> Self {
        let artifact = |name: &str, kind| Artifact {
            name: name.to_string(),
            version: version.to_string(),
            kind,
        };

        let mut names: Vec<String> = BASE_INSTALLERS.iter().map(|s| (*s).to_string()).collect();
        for extra in manifest.installers_for(enabled) {
            if !names.contains(&extra) {
                names.push(extra);
            }
        }

        Self {
            installers: names
                .iter()
                .map(|n| artifact(n, ArtifactKind::Installer))
                .collect(),
            archives: BASE_ARCHIVES
                .iter()
                .map(|n| artifact(n, ArtifactKind::Archive))
                .collect(),
        }
    }
}

/// Why a single pull failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PullError {
    /// Network or server-side failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials missing or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Content did not match its digest.
    #[error("digest mismatch: {0}")]
    Digest(String),

    /// Local failure before or after the transfer.
    #[error("local error: {0}")]
    Local(String),
}

/// OCI registry pull capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Pull `reference` into `dest`, overwriting existing files.
    async fn pull(&self, reference: &str, dest: &Path) -> std::result::Result<(), PullError>;
}

/// Pulls with the `oras` CLI.
pub struct OrasRegistry<'a> {
    runner: &'a dyn CommandRunner,
    ca_file: Option<PathBuf>,
}

impl<'a> OrasRegistry<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, ca_file: Option<PathBuf>) -> Self {
        Self { runner, ca_file }
    }
}

/// Map `oras` stderr onto a [`PullError`].
#[must_use]
pub fn classify_pull_failure(stderr: &str) -> PullError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("401")
        || lower.contains("403")
    {
        PullError::Unauthorized(message)
    } else if lower.contains("digest") && (lower.contains("mismatch") || lower.contains("invalid")) {
        PullError::Digest(message)
    } else {
        PullError::Transport(message)
    }
}

#[async_trait]
impl Registry for OrasRegistry<'_> {
    async fn pull(&self, reference: &str, dest: &Path) -> std::result::Result<(), PullError> {
        let mut spec = CommandSpec::new("oras").args(["pull", "-v"]);
        if let Some(ca) = &self.ca_file {
            spec = spec.arg("--ca-file").path_arg(ca);
        }
        let spec = spec.arg(reference).current_dir(dest);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| PullError::Local(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_pull_failure(&output.stderr))
        }
    }
}

/// What staging did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// References pulled on this run.
    pub pulled: Vec<String>,
    /// Total pull attempts, including retries.
    pub attempts: u32,
    /// Located staged files.
    pub files: Vec<PathBuf>,
}

/// Runs the staging phase.
pub struct Stager<'a> {
    registry: &'a dyn Registry,
    runner: &'a dyn CommandRunner,
    settings: &'a InstallSettings,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl<'a> Stager<'a> {
    #[must_use]
    pub fn new(
        registry: &'a dyn Registry,
        runner: &'a dyn CommandRunner,
        settings: &'a InstallSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            runner,
            settings,
            retry: RetryConfig::registry(),
            cancel,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Stage `set` according to `mode` and verify the result.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::RegistryUnreachable`] once retries are
    /// exhausted, [`InstallError::AuthenticationRequired`] or
    /// [`InstallError::ChecksumMismatch`] for non-transport failures,
    /// [`InstallError::ArtifactMissing`] if a required file is absent
    /// afterwards, and [`InstallError::PipelineAborted`] on cancellation.
    pub async fn stage(&self, set: &ArtifactSet, mode: StageMode) -> Result<StageReport> {
        let mut report = StageReport::default();
        let installers_dir = self.settings.installers_dir();
        let archives_dir = self.settings.archives_dir();

        match mode {
            StageMode::Fetch => {
                let total = set.installers.len() + set.archives.len();
                let progress = download_bar(total as u64);
                let fetched = self
                    .fetch_list(&set.installers, &installers_dir, &mut report, &progress)
                    .await;
                if let Err(e) = fetched {
                    progress.abandon();
                    return Err(e);
                }
                let fetched = self
                    .fetch_list(&set.archives, &archives_dir, &mut report, &progress)
                    .await;
                if let Err(e) = fetched {
                    progress.abandon();
                    return Err(e);
                }
                progress.finish_with_message("artifacts downloaded");
            }
            StageMode::AssumePresent => info!("Skipping artifact download"),
        }
        self.chown(&installers_dir).await?;
        self.chown(&archives_dir).await?;

        report.files = verify_staged(set, &installers_dir, &archives_dir)?;
        Ok(report)
    }

    /// Stage the installer bundles of `set` that are not on disk yet,
    /// leaving bundles already staged in place.
    ///
    /// # Errors
    ///
    /// As [`Stager::stage`]; in [`StageMode::AssumePresent`] a bundle that
    /// is still missing is [`InstallError::ArtifactMissing`].
    pub async fn stage_missing(&self, set: &ArtifactSet, mode: StageMode) -> Result<StageReport> {
        let mut report = StageReport::default();
        let installers_dir = self.settings.installers_dir();
        let missing: Vec<&Artifact> = set
            .installers
            .iter()
            .filter(|a| !find_installer(&installers_dir, &a.name).is_some_and(|p| is_nonempty_file(&p)))
            .collect();

        if mode == StageMode::Fetch && !missing.is_empty() {
            std::fs::create_dir_all(&installers_dir).map_err(|e| InstallError::io(&installers_dir, e))?;
            for artifact in missing {
                let reference = artifact.reference(self.settings);
                self.pull_with_retry(&reference, &installers_dir, &mut report).await?;
                report.pulled.push(reference);
            }
            self.chown(&installers_dir).await?;
        }

        let bundles = ArtifactSet {
            installers: set.installers.clone(),
            archives: Vec::new(),
        };
        report.files = verify_staged(&bundles, &installers_dir, &self.settings.archives_dir())?;
        Ok(report)
    }

    async fn fetch_list(
        &self,
        artifacts: &[Artifact],
        dir: &Path,
        report: &mut StageReport,
        progress: &ProgressBar,
    ) -> Result<()> {
        // stale bundles from an older version must not satisfy the globs
        let rm = CommandSpec::new("rm").arg("-rf").path_arg(dir).privileged();
        run_checked(self.runner, &rm)
            .await
            .map_err(|e| InstallError::io(dir, std::io::Error::other(e.to_string())))?;
        std::fs::create_dir_all(dir).map_err(|e| InstallError::io(dir, e))?;

        for artifact in artifacts {
            let reference = artifact.reference(self.settings);
            progress.set_message(artifact.name.clone());
            self.pull_with_retry(&reference, dir, report).await?;
            progress.inc(1);
            report.pulled.push(reference);
        }
        Ok(())
    }

    async fn pull_with_retry(
        &self,
        reference: &str,
        dir: &Path,
        report: &mut StageReport,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(InstallError::PipelineAborted);
            }

            attempt += 1;
            report.attempts += 1;
            debug!(reference = %reference, attempt, "Pulling artifact");

            let err = match self.registry.pull(reference, dir).await {
                Ok(()) => {
                    info!(reference = %reference, "Pulled artifact");
                    return Ok(());
                }
                Err(e) => e,
            };

            match err {
                PullError::Unauthorized(_) => {
                    return Err(InstallError::AuthenticationRequired(reference.to_string()))
                }
                PullError::Local(message) => {
                    return Err(InstallError::io(dir, std::io::Error::other(message)))
                }
                PullError::Transport(_) | PullError::Digest(_) => {}
            }

            if !self.retry.should_retry(attempt) {
                return Err(match err {
                    PullError::Digest(_) => InstallError::ChecksumMismatch(reference.to_string()),
                    other => InstallError::RegistryUnreachable {
                        reference: reference.to_string(),
                        attempts: attempt,
                        message: other.to_string(),
                    },
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                reference = %reference,
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_secs = delay.as_secs(),
                error = %err,
                "Download failed, retrying"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return Err(InstallError::PipelineAborted),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn chown(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        let spec = CommandSpec::new("chown")
            .args(["-R", APT_OWNER])
            .path_arg(dir)
            .privileged();
        run_checked(self.runner, &spec)
            .await
            .map_err(|e| InstallError::io(dir, std::io::Error::other(e.to_string())))?;
        Ok(())
    }
}

/// Counts pulled artifacts; indicatif hides it when stderr is not a terminal.
fn download_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("  [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}")
        .map(|s| s.progress_chars("#>."))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let bar = ProgressBar::new(len);
    bar.set_style(style);
    bar.set_message("downloading artifacts");
    bar
}

/// Locate `installers/<name>_*.deb`.
#[must_use]
pub fn find_installer(dir: &Path, name: &str) -> Option<PathBuf> {
    let prefix = format!("{name}_");
    find_file(dir, |file| file.starts_with(&prefix) && file.ends_with(".deb"))
}

/// Locate the configuration repository archive in `repo_archives/`.
#[must_use]
pub fn find_repo_archive(dir: &Path) -> Option<PathBuf> {
    find_file(dir, |file| {
        file.contains(REPO_ARCHIVE_NAME) && file.ends_with(".tgz")
    })
}

fn find_file(dir: &Path, matches: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name().to_str().is_some_and(&matches))
        .map(|e| e.path())
        .collect();
    found.sort();
    found.pop()
}

/// Check every artifact in `set` resolves to a non-empty local file.
///
/// # Errors
///
/// Returns [`InstallError::ArtifactMissing`] for the first absent artifact.
pub fn verify_staged(set: &ArtifactSet, installers_dir: &Path, archives_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for artifact in &set.installers {
        match find_installer(installers_dir, &artifact.name) {
            Some(path) if is_nonempty_file(&path) => files.push(path),
            _ => {
                return Err(InstallError::ArtifactMissing(format!(
                    "{}/{}_*.deb",
                    installers_dir.display(),
                    artifact.name
                )))
            }
        }
    }

    if !set.archives.is_empty() {
        match find_repo_archive(archives_dir) {
            Some(path) if is_nonempty_file(&path) => files.push(path),
            _ => {
                return Err(InstallError::ArtifactMissing(format!(
                    "{}/*{REPO_ARCHIVE_NAME}*.tgz",
                    archives_dir.display()
                )))
            }
        }
    }

    Ok(files)
}
