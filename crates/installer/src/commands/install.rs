//! The `onprem-installer` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::KubeConnector;
use crate::config::settings::{
    default_kubeconfig_path, EnvOverlay, ARCHIVE_REGISTRY_PATH, DEFAULT_CONFIG_PATH,
    DEFAULT_DEPLOY_VERSION, DEFAULT_GITEA_IMAGE_REGISTRY, DEFAULT_PROFILE,
    DEFAULT_RELEASE_SERVICE_URL, DEV_PROFILE, INSTALLER_REGISTRY_PATH,
};
use crate::config::{InstallSettings, PackageManifest};
use crate::orchestrator::{Capabilities, Installer, Outcome};
use crate::process::SystemRunner;
use crate::stager::OrasRegistry;
use crate::ui;
use crate::wizard::DialoguerPrompter;

/// Install the Edge Orchestrator on this host
#[derive(Args, Debug, Clone)]
pub struct InstallCommand {
    /// CA certificate for the release service and GitOps endpoints
    #[arg(short = 'c', long = "cert", value_name = "FILE")]
    cert: Option<PathBuf>,

    /// CA certificate of the SRE destination; enables SRE TLS
    #[arg(short = 's', long = "sre", value_name = "FILE")]
    sre_cert: Option<PathBuf>,

    /// Use installers and archives already staged in the work directory
    #[arg(long, env = "SKIP_DOWNLOAD")]
    skip_download: bool,

    /// Skip TLS verification towards the SMTP server
    #[arg(short = 'd', long = "notls")]
    no_tls: bool,

    /// Use the development cluster profile
    #[arg(short = 'o', long = "override")]
    dev_override: bool,

    /// Release service registry host
    #[arg(short = 'u', long = "url", env = "RELEASE_SERVICE_URL", value_name = "URL")]
    url: Option<String>,

    /// Verbose tracing
    #[arg(short = 't', long, env = "ENABLE_TRACE")]
    pub trace: bool,

    /// Write the deployment tree to disk and stop before touching the cluster
    #[arg(short = 'w', long, env = "WRITE_CONFIG")]
    write_config: bool,

    /// Answer yes to "use existing configuration" prompts
    #[arg(short = 'y', long = "yes", env = "ASSUME_YES")]
    assume_yes: bool,

    /// Configuration document path
    #[arg(long, env = "ORCH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Package manifest replacing the built-in one
    #[arg(long, value_name = "FILE")]
    packages: Option<PathBuf>,

    /// Cluster profile under orch-configs/clusters
    #[arg(long, env = "ORCH_INSTALLER_PROFILE", value_name = "PROFILE")]
    profile: Option<String>,

    /// Release to deploy
    #[arg(long, env = "DEPLOY_VERSION", value_name = "VERSION")]
    deploy_version: Option<String>,

    /// Registry serving the Gitea images
    #[arg(long, env = "GITEA_IMAGE_REGISTRY", value_name = "HOST")]
    gitea_image_registry: Option<String>,

    /// Where the cluster kubeconfig is written
    #[arg(long, env = "KUBECONFIG", value_name = "FILE")]
    kubeconfig: Option<PathBuf>,

    /// Directory holding installers/ and repo_archives/
    #[arg(long, value_name = "DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Never prompt; fail on invalid configuration
    #[arg(long)]
    non_interactive: bool,

    /// Ask every optional question group without confirmation
    #[arg(long)]
    expert: bool,
}

impl InstallCommand {
    /// Resolve flags and environment into run settings.
    #[must_use]
    pub fn settings(&self) -> InstallSettings {
        let profile = if self.dev_override {
            DEV_PROFILE.to_string()
        } else {
            non_empty(self.profile.as_deref()).unwrap_or_else(|| DEFAULT_PROFILE.to_string())
        };

        InstallSettings {
            config_path: self
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            packages_path: self.packages.clone(),
            work_dir: self.work_dir.clone(),
            release_service_url: non_empty(self.url.as_deref())
                .unwrap_or_else(|| DEFAULT_RELEASE_SERVICE_URL.to_string()),
            installer_path: INSTALLER_REGISTRY_PATH.to_string(),
            archive_path: ARCHIVE_REGISTRY_PATH.to_string(),
            deploy_version: non_empty(self.deploy_version.as_deref())
                .unwrap_or_else(|| DEFAULT_DEPLOY_VERSION.to_string()),
            profile,
            gitea_image_registry: non_empty(self.gitea_image_registry.as_deref())
                .unwrap_or_else(|| DEFAULT_GITEA_IMAGE_REGISTRY.to_string()),
            kubeconfig: self
                .kubeconfig
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(default_kubeconfig_path),
            ca_cert: self.cert.clone(),
            sre_tls: self.sre_cert.is_some(),
            sre_ca_cert: self.sre_cert.clone(),
            smtp_skip_verify: self.no_tls,
            skip_download: self.skip_download,
            write_config: self.write_config,
            assume_yes: self.assume_yes,
            interactive: !self.non_interactive,
            expert_mode: self.expert,
            trace: self.trace,
        }
    }

    /// Run the five installer phases.
    ///
    /// # Errors
    ///
    /// Returns an error when the package manifest cannot be read or a phase
    /// fails; phase failures carry the phase name.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Outcome> {
        ui::print_banner();

        let settings = self.settings();
        debug!(?settings, "Resolved settings");

        let manifest = match &settings.packages_path {
            Some(path) => PackageManifest::from_path(path)
                .with_context(|| format!("Failed to load package manifest {}", path.display()))?,
            None => PackageManifest::embedded()?,
        };

        let runner = SystemRunner::detect();
        let registry = OrasRegistry::new(&runner, settings.ca_cert.clone());
        let connector = KubeConnector;
        let mut prompter = DialoguerPrompter::new();

        let caps = Capabilities {
            runner: &runner,
            registry: &registry,
            connector: &connector,
            prompter: &mut prompter,
        };

        let mut installer = Installer::new(&settings, &manifest, EnvOverlay::from_env(), caps, cancel);
        let outcome = installer.run().await?;
        Ok(outcome)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
