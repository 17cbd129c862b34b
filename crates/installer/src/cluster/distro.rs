//! Local Kubernetes distribution and GitOps controller install.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::wait::{self, WaitOptions};
use super::{ClusterApi, ARGOCD_NAMESPACE, GITEA_NAMESPACE};
use crate::config::{Config, InstallSettings};
use crate::error::{InstallError, Result};
use crate::process::{run_checked, CommandRunner, CommandSpec};
use crate::stager::find_installer;
use crate::ui;

/// Admin kubeconfig written by the distribution.
pub const DISTRO_KUBECONFIG: &str = "/etc/rancher/rke2/rke2.yaml";
pub const DISTRO_INSTALLER: &str = "onprem-ke-installer";
pub const GITOPS_INSTALLER: &str = "onprem-argocd-installer";

/// Namespaces the GitOps controller bundle brings up, in order.
pub const CONTROLLER_NAMESPACES: [&str; 2] = [GITEA_NAMESPACE, ARGOCD_NAMESPACE];

/// Timing for the controller readiness waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerWaits {
    pub namespace: WaitOptions,
    /// Pause between the namespace appearing and checking its pods.
    pub settle: Duration,
    pub pods: WaitOptions,
}

impl Default for ControllerWaits {
    fn default() -> Self {
        Self {
            namespace: WaitOptions::new(wait::NAMESPACE_POLL, wait::DEFAULT_TIMEOUT),
            settle: Duration::from_secs(30),
            pods: WaitOptions::new(wait::POD_POLL, wait::DEFAULT_TIMEOUT),
        }
    }
}

fn bootstrap_err(context: &str, err: impl std::fmt::Display) -> InstallError {
    InstallError::ClusterBootstrap(format!("{context}: {err}"))
}

/// `apt-get install` for a staged bundle, non-interactive.
fn apt_install(deb: &Path) -> CommandSpec {
    CommandSpec::new("apt-get")
        .args(["install", "-y"])
        .path_arg(deb)
        .env("NEEDRESTART_MODE", "a")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .privileged()
}

/// Installs the distribution and the GitOps controller from staged bundles.
pub struct DistroInstaller<'a> {
    runner: &'a dyn CommandRunner,
    settings: &'a InstallSettings,
    cancel: CancellationToken,
    waits: ControllerWaits,
}

impl<'a> DistroInstaller<'a> {
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        settings: &'a InstallSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            settings,
            cancel,
            waits: ControllerWaits::default(),
        }
    }

    #[must_use]
    pub fn with_waits(mut self, waits: ControllerWaits) -> Self {
        self.waits = waits;
        self
    }

    /// Absolute path of a staged bundle; apt treats bare names as packages.
    fn staged_bundle(&self, name: &str) -> Result<PathBuf> {
        let dir = self.settings.installers_dir();
        let deb = find_installer(&dir, name)
            .ok_or_else(|| InstallError::ArtifactMissing(format!("{}/{name}_*.deb", dir.display())))?;
        std::fs::canonicalize(&deb).map_err(|e| InstallError::io(&deb, e))
    }

    /// Install the distribution and hand its kubeconfig to the invoking user.
    ///
    /// Returns the user kubeconfig path.
    ///
    /// # Errors
    ///
    /// [`InstallError::ArtifactMissing`] if the bundle is not staged,
    /// otherwise [`InstallError::ClusterBootstrap`].
    pub async fn install_distribution(&self, config: &Config) -> Result<PathBuf> {
        let deb = self.staged_bundle(DISTRO_INSTALLER)?;

        let mut install = apt_install(&deb);
        if let Some((username, token)) = config.onprem.docker_credentials() {
            debug!("Passing Docker registry credentials to the distribution installer");
            install = install
                .env("DOCKER_USERNAME", username)
                .env("DOCKER_PASSWORD", token);
        }

        ui::print_step("Installing Kubernetes distribution");
        run_checked(self.runner, &install)
            .await
            .map_err(|e| bootstrap_err("installing the distribution", format!("{e:#}")))?;
        info!(bundle = %deb.display(), "Distribution installed");

        let kubeconfig = self.copy_kubeconfig().await?;
        ui::print_success(&format!("Kubeconfig written to {}", kubeconfig.display()));
        Ok(kubeconfig)
    }

    async fn copy_kubeconfig(&self) -> Result<PathBuf> {
        let dest = self.settings.kubeconfig.clone();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
        }

        let user = self.whoami("-un").await?;
        let group = self.whoami("-gn").await?;

        let steps = [
            CommandSpec::new("cp")
                .arg(DISTRO_KUBECONFIG)
                .path_arg(&dest)
                .privileged(),
            CommandSpec::new("chown")
                .arg(format!("{user}:{group}"))
                .path_arg(&dest)
                .privileged(),
            CommandSpec::new("chmod").arg("600").path_arg(&dest).privileged(),
        ];
        for step in &steps {
            run_checked(self.runner, step)
                .await
                .map_err(|e| bootstrap_err("copying kubeconfig", format!("{e:#}")))?;
        }

        debug!(path = %dest.display(), owner = %user, "Kubeconfig copied");
        Ok(dest)
    }

    async fn whoami(&self, flag: &str) -> Result<String> {
        let output = run_checked(self.runner, &CommandSpec::new("id").arg(flag))
            .await
            .map_err(|e| bootstrap_err("resolving invoking user", format!("{e:#}")))?;
        let name = output.stdout.trim().to_string();
        if name.is_empty() {
            return Err(bootstrap_err("resolving invoking user", "id returned nothing"));
        }
        Ok(name)
    }

    /// Install the GitOps controller bundle and wait for its namespaces.
    ///
    /// # Errors
    ///
    /// [`InstallError::ClusterBootstrap`] if the install fails,
    /// [`InstallError::ClusterWaitTimeout`] if a namespace never settles,
    /// [`InstallError::PipelineAborted`] on cancellation.
    pub async fn install_gitops_controller(&self, api: &dyn ClusterApi) -> Result<()> {
        let deb = self.staged_bundle(GITOPS_INSTALLER)?;

        ui::print_step("Installing GitOps controller");
        run_checked(self.runner, &apt_install(&deb))
            .await
            .map_err(|e| bootstrap_err("installing the GitOps controller", format!("{e:#}")))?;
        info!(bundle = %deb.display(), "GitOps controller installed");

        for namespace in CONTROLLER_NAMESPACES {
            wait::wait_for_namespace(api, namespace, self.waits.namespace, &self.cancel).await?;
            wait::sleep_or_cancel(self.waits.settle, &self.cancel).await?;
            wait::wait_for_pods_ready(api, namespace, self.waits.pods, &self.cancel).await?;
            ui::print_check_result(&format!("{namespace} ready"), true, None);
        }
        Ok(())
    }
}
