//! Installer pipeline.
//!
//! Runs the five phases strictly in order:
//! - host preparation
//! - artifact staging
//! - configuration
//! - cluster and secret bootstrap
//! - GitOps handoff
//!
//! Nothing is persisted between runs except the config document, the staging
//! directories and what the cluster holds, so a failed run is recovered by
//! running the installer again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::distro::{ControllerWaits, DistroInstaller};
use crate::cluster::wait::WaitOptions;
use crate::cluster::{seed_namespaces, ClusterApi, ClusterConnector, ORCH_NAMESPACES};
use crate::config::overrides::ProfileOverrides;
use crate::config::settings::EnvOverlay;
use crate::config::{self, validate, Config, InstallSettings, LoadSource, PackageManifest};
use crate::error::{InstallError, Result};
use crate::gitops::{self, GitOpsHandoff, HandoffReport, RepoLayout, TreeSource, ROOT_APP};
use crate::host::{HostPaths, HostPreparer, ToolSources};
use crate::process::CommandRunner;
use crate::secrets::{self, AdminPasswords};
use crate::stager::{ArtifactSet, Registry, StageMode, Stager};
use crate::state::{Phase, RetryConfig, RunState};
use crate::ui;
use crate::wizard::{Prompter, Wizard};

/// A pipeline failure, tagged with the phase it happened in.
#[derive(Error, Debug)]
#[error("Installation failed at phase '{phase}': {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: InstallError,
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `root-app` is registered; the GitOps controller takes over.
    Installed(HandoffReport),
    /// `--write-config`: the edited working tree was left for manual changes.
    TreeWritten(PathBuf),
}

/// External capabilities the pipeline drives.
pub struct Capabilities<'a> {
    pub runner: &'a dyn CommandRunner,
    pub registry: &'a dyn Registry,
    pub connector: &'a dyn ClusterConnector,
    pub prompter: &'a mut dyn Prompter,
}

/// Retry and wait timing for every phase.
#[derive(Debug, Clone)]
pub struct Timings {
    pub registry_retry: RetryConfig,
    pub controller: ControllerWaits,
    pub push_job: WaitOptions,
    pub root_app: WaitOptions,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            registry_retry: RetryConfig::registry(),
            controller: ControllerWaits::default(),
            push_job: gitops::JOB_WAIT,
            root_app: gitops::APPLICATION_WAIT,
        }
    }
}

/// Drives one installer run.
pub struct Installer<'a> {
    settings: &'a InstallSettings,
    manifest: &'a PackageManifest,
    env: EnvOverlay,
    caps: Capabilities<'a>,
    host_paths: HostPaths,
    tool_sources: ToolSources,
    timings: Timings,
    cancel: CancellationToken,
    state: RunState,
    config: Option<Config>,
    cluster: Option<Arc<dyn ClusterApi>>,
    outcome: Option<Outcome>,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(
        settings: &'a InstallSettings,
        manifest: &'a PackageManifest,
        env: EnvOverlay,
        caps: Capabilities<'a>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            manifest,
            env,
            caps,
            host_paths: HostPaths::default(),
            tool_sources: ToolSources::default(),
            timings: Timings::default(),
            cancel,
            state: RunState::new(),
            config: None,
            cluster: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn with_host_paths(mut self, paths: HostPaths) -> Self {
        self.host_paths = paths;
        self
    }

    #[must_use]
    pub fn with_tool_sources(mut self, sources: ToolSources) -> Self {
        self.tool_sources = sources;
        self
    }

    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// The config document once the configuration phase has run.
    #[must_use]
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Run every phase in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns a [`PhaseError`] naming the failing phase and its cause.
    pub async fn run(&mut self) -> std::result::Result<Outcome, PhaseError> {
        ui::print_section("Starting Installation");
        self.state.advance();

        while !self.state.is_complete() {
            let phase = self.state.phase;
            ui::print_progress_step(phase.step_number(), Phase::TOTAL_STEPS, phase.description());

            if let Err(source) = self.execute(phase).await {
                self.state.record_error(&source.to_string());
                error!(phase = ?phase, error = %source, "Installation failed");
                return Err(PhaseError { phase, source });
            }
            self.state.advance();
        }

        let outcome = self.outcome.take().ok_or_else(|| PhaseError {
            phase: Phase::GitOpsHandoff,
            source: InstallError::RootAppInstallFailed("handoff produced no result".to_string()),
        })?;
        self.print_summary(&outcome);
        Ok(outcome)
    }

    async fn execute(&mut self, phase: Phase) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::PipelineAborted);
        }
        info!(phase = ?phase, "Executing phase");

        match phase {
            Phase::HostPreparation => self.prepare_host().await,
            Phase::ArtifactStaging => self.stage_artifacts().await,
            Phase::Configuration => {
                self.configure()?;
                self.stage_selected_bundles().await
            }
            Phase::ClusterBootstrap => self.bootstrap_cluster().await,
            Phase::GitOpsHandoff => self.hand_off().await,
            Phase::NotStarted | Phase::Complete => Ok(()),
        }
    }

    async fn prepare_host(&self) -> Result<()> {
        let report = HostPreparer::new(self.caps.runner)
            .with_paths(self.host_paths.clone())
            .with_sources(self.tool_sources.clone())
            .prepare()
            .await?;
        if !report.tools_installed.is_empty() {
            ui::print_info(&format!("Installed: {}", report.tools_installed.join(", ")));
        }
        Ok(())
    }

    fn stager(&self) -> Stager<'_> {
        Stager::new(
            self.caps.registry,
            self.caps.runner,
            self.settings,
            self.cancel.clone(),
        )
        .with_retry(self.timings.registry_retry.clone())
    }

    fn stage_mode(&self) -> StageMode {
        if self.settings.skip_download {
            StageMode::AssumePresent
        } else {
            StageMode::Fetch
        }
    }

    async fn stage_artifacts(&self) -> Result<()> {
        let enabled = self.peek_enabled();
        let set = ArtifactSet::required(&enabled, self.manifest, &self.settings.deploy_version);
        let report = self.stager().stage(&set, self.stage_mode()).await?;

        ui::print_success(&format!("{} artifacts staged", report.files.len()));
        Ok(())
    }

    /// Bundles of components picked during configuration that staging
    /// could not know about.
    async fn stage_selected_bundles(&self) -> Result<()> {
        let config = self.config.as_ref().ok_or_else(missing_config)?;
        let set = ArtifactSet::required(&config.orch.enabled, self.manifest, &self.settings.deploy_version);
        let report = self.stager().stage_missing(&set, self.stage_mode()).await?;
        if !report.pulled.is_empty() {
            ui::print_success(&format!("{} component bundles staged", report.pulled.len()));
        }
        Ok(())
    }

    /// Components already selected in the document on disk. Staging runs
    /// before the configuration phase, so this only reads.
    fn peek_enabled(&self) -> BTreeSet<String> {
        match config::load(&self.settings.config_path, self.manifest) {
            Ok(outcome) => outcome.config.orch.enabled,
            Err(e) => {
                debug!(error = %e, "Config not readable yet, staging base bundles only");
                BTreeSet::new()
            }
        }
    }

    fn configure(&mut self) -> Result<()> {
        let path = self.settings.config_path.clone();
        let loaded = config::load(&path, self.manifest)?;
        if let LoadSource::Migrated { from } = loaded.source {
            ui::print_info(&format!(
                "Migrated {} from version {from} to {}",
                path.display(),
                config::CURRENT_VERSION
            ));
        }

        let mut config = loaded.config;
        self.env.apply(&mut config);

        let mut elicit = self.settings.interactive && !self.keep_existing(&config, loaded.source)?;
        loop {
            if elicit {
                Wizard::new(&mut *self.caps.prompter, self.manifest)
                    .expert_mode(self.settings.expert_mode)
                    .run(&mut config)?;
            }
            config.fill_defaults();
            self.record_ca(&mut config)?;

            let problems = validate::violations(&config, self.manifest);
            let Some(first) = problems.first() else {
                break;
            };
            if !self.settings.interactive {
                return Err(first.clone().into());
            }
            for problem in &problems {
                ui::print_warning(&problem.to_string());
            }
            elicit = true;
        }

        config::save(&mut config, &path, self.manifest)?;
        ui::print_success(&format!("Configuration saved to {}", path.display()));

        self.env.apply_runtime_defaults(&mut config);
        if let Some(ca) = &self.settings.sre_ca_cert {
            config.sre.ca_secret = read_pem(ca, "sre.caSecret")?;
        }
        self.config = Some(config);
        Ok(())
    }

    /// Whether an existing, valid document is used as is.
    fn keep_existing(&mut self, config: &Config, source: LoadSource) -> Result<bool> {
        if source == LoadSource::Fresh {
            return Ok(false);
        }
        if !validate::violations(config, self.manifest).is_empty() {
            ui::print_warning("Existing configuration is incomplete");
            return Ok(false);
        }
        if self.settings.assume_yes {
            return Ok(true);
        }
        self.caps
            .prompter
            .confirm(
                &format!("Use existing configuration at {}?", self.settings.config_path.display()),
                true,
            )
            .map_err(|e| InstallError::invalid("<document>", "", format!("no answer: {e:#}")))
    }

    /// `-c` CA bundle, kept in the generated section.
    fn record_ca(&self, config: &mut Config) -> Result<()> {
        if let Some(ca) = &self.settings.ca_cert {
            config.generated.tls_ca = read_pem(ca, "generated.tlsCa")?;
        }
        Ok(())
    }

    async fn bootstrap_cluster(&mut self) -> Result<()> {
        if self.settings.write_config {
            info!("Writing configuration only, cluster left untouched");
            return Ok(());
        }
        let config = self.config.clone().ok_or_else(missing_config)?;

        let distro = DistroInstaller::new(self.caps.runner, self.settings, self.cancel.clone())
            .with_waits(self.timings.controller);
        let kubeconfig = distro.install_distribution(&config).await?;
        self.record_kubeconfig(&kubeconfig)?;

        let api = self
            .caps
            .connector
            .connect(&kubeconfig)
            .await
            .map_err(|e| InstallError::ClusterBootstrap(format!("connecting to the cluster: {e:#}")))?;

        distro.install_gitops_controller(api.as_ref()).await?;

        seed_namespaces(api.as_ref(), &ORCH_NAMESPACES).await?;
        ui::print_success(&format!("{} namespaces ready", ORCH_NAMESPACES.len()));

        let passwords = AdminPasswords::resolve(api.as_ref(), config.orch.password_policy).await?;
        let records = secrets::plan(&config, &passwords);
        let written = secrets::write_all(api.as_ref(), &records).await?;
        ui::print_success(&format!("{written} secrets written"));

        self.cluster = Some(api);
        Ok(())
    }

    /// Store the cluster kubeconfig path in the saved document. The
    /// in-memory copy carries runtime-only values, so the file is reloaded.
    fn record_kubeconfig(&mut self, kubeconfig: &Path) -> Result<()> {
        let path = &self.settings.config_path;
        let mut saved = config::load(path, self.manifest)?.config;
        saved.generated.kube_config = kubeconfig.display().to_string();
        config::save(&mut saved, path, self.manifest)?;

        if let Some(config) = self.config.as_mut() {
            config.generated.kube_config = saved.generated.kube_config;
        }
        Ok(())
    }

    async fn hand_off(&mut self) -> Result<()> {
        let source = self.tree_source()?;
        let config = self.config.as_ref().ok_or_else(missing_config)?;
        let overrides = ProfileOverrides::from_config(config, self.settings);

        let materialized = gitops::materialize(self.settings, &overrides, source, self.settings.write_config)?;
        if let Some(tree) = materialized.kept_tree {
            self.outcome = Some(Outcome::TreeWritten(tree));
            return Ok(());
        }

        let api = self
            .cluster
            .clone()
            .ok_or_else(|| InstallError::ClusterBootstrap("cluster connection not established".to_string()))?;
        let report = GitOpsHandoff::new(api.as_ref(), self.caps.runner, self.settings, self.cancel.clone())
            .with_waits(self.timings.push_job, self.timings.root_app)
            .run(&materialized.archive)
            .await?;
        self.outcome = Some(Outcome::Installed(report));
        Ok(())
    }

    /// Keep or replace a working tree left by an earlier `--write-config`.
    fn tree_source(&mut self) -> Result<TreeSource> {
        let layout = RepoLayout::new(self.settings);
        if !layout.has_existing_tree() {
            return Ok(TreeSource::Extract);
        }
        if self.settings.assume_yes || !self.settings.interactive {
            ui::print_info(&format!("Keeping existing working tree at {}", layout.tree.display()));
            return Ok(TreeSource::Reuse);
        }
        let overwrite = self
            .caps
            .prompter
            .confirm(
                &format!("{} already exists. Overwrite it?", layout.tree.display()),
                false,
            )
            .map_err(|e| InstallError::invalid("<document>", "", format!("no answer: {e:#}")))?;
        Ok(if overwrite {
            TreeSource::Extract
        } else {
            TreeSource::Reuse
        })
    }

    fn print_summary(&self, outcome: &Outcome) {
        let field = |key: &str, value: &str| {
            println!("  {} {}", format!("{key}:").bright_black(), value.green());
        };
        match outcome {
            Outcome::Installed(report) => {
                ui::print_section("Installation Complete");
                field("Gitea", &report.gitea_host);
                field("Application", &format!("{}/{ROOT_APP}", report.application_namespace));
                ui::print_info(&format!(
                    "Run `kubectl get applications -A` and wait for {ROOT_APP} to be Healthy and Synced"
                ));
            }
            Outcome::TreeWritten(tree) => {
                ui::print_section("Configuration Written");
                field("Working tree", &tree.display().to_string());
                ui::print_info("Edit the tree, then re-run the installer without --write-config");
            }
        }
        if !self.state.completed.is_empty() {
            debug!(phases = self.state.completed.len(), "Run finished");
        }
    }
}

fn missing_config() -> InstallError {
    InstallError::invalid("<document>", "", "configuration phase has not run")
}

fn read_pem(path: &Path, field: &str) -> Result<String> {
    let pem = std::fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
    if let Err(rule) = validate::pem_certificate(&pem) {
        warn!(path = %path.display(), "Not a PEM certificate");
        return Err(InstallError::invalid(field, path.display().to_string(), rule));
    }
    Ok(pem)
}
