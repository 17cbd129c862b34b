//! Host preparation.
//!
//! Makes the local machine able to run the Kubernetes distribution and
//! serve local persistent volumes. Nothing here touches the cluster, and any
//! failure stops the pipeline before it does.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::error::{InstallError, Result};
use crate::process::{run_checked, CommandRunner, CommandSpec};
use crate::ui;

pub const INOTIFY_LIMIT: u32 = 1_048_576;
const INOTIFY_KEYS: [&str; 3] = [
    "fs.inotify.max_queued_events",
    "fs.inotify.max_user_instances",
    "fs.inotify.max_user_watches",
];
pub const KERNEL_MODULES: [&str; 2] = ["dm-snapshot", "dm-mirror"];

pub const YQ_VERSION: &str = "v4.42.1";
pub const HELM_VERSION: &str = "v3.12.3";

/// Host locations touched during preparation.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub sysctl_conf: PathBuf,
    pub modules_load: PathBuf,
    pub hostpath_dirs: Vec<PathBuf>,
    pub bin_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sysctl_conf: PathBuf::from("/etc/sysctl.conf"),
            modules_load: PathBuf::from("/etc/modules-load.d/lv-snapshots.conf"),
            hostpath_dirs: vec![PathBuf::from("/var/openebs/local")],
            bin_dir: PathBuf::from("/usr/local/bin"),
        }
    }
}

/// Download locations for tools installed on demand.
#[derive(Debug, Clone)]
pub struct ToolSources {
    pub yq_url: String,
    pub helm_url: String,
}

impl Default for ToolSources {
    fn default() -> Self {
        Self {
            yq_url: format!(
                "https://github.com/mikefarah/yq/releases/download/{YQ_VERSION}/yq_linux_amd64"
            ),
            helm_url: format!("https://get.helm.sh/helm-{HELM_VERSION}-linux-amd64.tar.gz"),
        }
    }
}

/// What preparation changed on this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReport {
    pub sysctl_lines_added: usize,
    pub tools_installed: Vec<String>,
}

fn host_err(context: &str, err: impl std::fmt::Display) -> InstallError {
    InstallError::HostPrep(format!("{context}: {err}"))
}

/// Runs the host preparation steps.
pub struct HostPreparer<'a> {
    runner: &'a dyn CommandRunner,
    http: reqwest::Client,
    paths: HostPaths,
    sources: ToolSources,
}

impl<'a> HostPreparer<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            http: reqwest::Client::new(),
            paths: HostPaths::default(),
            sources: ToolSources::default(),
        }
    }

    #[must_use]
    pub fn with_paths(mut self, paths: HostPaths) -> Self {
        self.paths = paths;
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: ToolSources) -> Self {
        self.sources = sources;
        self
    }

    /// Run every preparation step in order.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HostPrep`] on the first failing step.
    pub async fn prepare(&self) -> Result<HostReport> {
        let mut report = HostReport::default();

        report.sysctl_lines_added = self.ensure_inotify_limits().await?;
        ui::print_check_result("inotify limits", true, None);

        self.load_kernel_modules().await?;
        ui::print_check_result("kernel modules", true, Some(&KERNEL_MODULES.join(", ")));

        self.ensure_hostpath_dirs().await?;
        ui::print_check_result("hostpath directories", true, None);

        report.tools_installed = self.verify_tools().await?;
        ui::print_check_result("tool chain", true, None);

        Ok(report)
    }

    /// Append missing inotify lines to the sysctl file and reload it.
    ///
    /// Returns the number of lines appended.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HostPrep`] if the file cannot be updated or
    /// `sysctl -p` fails.
    pub async fn ensure_inotify_limits(&self) -> Result<usize> {
        let path = &self.paths.sysctl_conf;
        let existing = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(host_err(&format!("reading {}", path.display()), e)),
        };

        let missing = missing_sysctl_lines(&existing);
        if !missing.is_empty() {
            let mut input = String::new();
            if !existing.is_empty() && !existing.ends_with('\n') {
                input.push('\n');
            }
            for line in &missing {
                input.push_str(line);
                input.push('\n');
            }

            let tee = CommandSpec::new("tee")
                .arg("-a")
                .path_arg(path)
                .stdin(input)
                .privileged();
            run_checked(self.runner, &tee)
                .await
                .map_err(|e| host_err(&format!("updating {}", path.display()), e))?;
            info!(lines = missing.len(), "Raised inotify limits");
        }

        let reload = CommandSpec::new("sysctl").arg("-p").path_arg(path).privileged();
        run_checked(self.runner, &reload)
            .await
            .map_err(|e| host_err("reloading sysctl", e))?;

        Ok(missing.len())
    }

    /// Register the LVM snapshot modules for auto-load and load them now.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HostPrep`] if the registration cannot be
    /// written or `modprobe` fails.
    pub async fn load_kernel_modules(&self) -> Result<()> {
        let path = &self.paths.modules_load;
        let content = KERNEL_MODULES.iter().fold(String::new(), |mut acc, m| {
            acc.push_str(m);
            acc.push('\n');
            acc
        });

        if let Some(parent) = path.parent() {
            let mkdir = CommandSpec::new("mkdir").arg("-p").path_arg(parent).privileged();
            run_checked(self.runner, &mkdir)
                .await
                .map_err(|e| host_err("creating modules-load directory", e))?;
        }
        let tee = CommandSpec::new("tee").path_arg(path).stdin(content).privileged();
        run_checked(self.runner, &tee)
            .await
            .map_err(|e| host_err(&format!("writing {}", path.display()), e))?;

        for module in KERNEL_MODULES {
            let modprobe = CommandSpec::new("modprobe").arg(module).privileged();
            let output = self
                .runner
                .run(&modprobe)
                .await
                .map_err(|e| host_err("running modprobe", e))?;
            if !output.success() && !output.stderr.contains("already loaded") {
                return Err(host_err(
                    &format!("loading kernel module {module}"),
                    output.stderr.trim(),
                ));
            }
            debug!(module, "Kernel module loaded");
        }

        Ok(())
    }

    /// Create the hostpath directories with mode 0755.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HostPrep`] if a directory cannot be created.
    pub async fn ensure_hostpath_dirs(&self) -> Result<()> {
        for dir in &self.paths.hostpath_dirs {
            let mkdir = CommandSpec::new("mkdir")
                .args(["-p", "-m", "0755"])
                .path_arg(dir)
                .privileged();
            run_checked(self.runner, &mkdir)
                .await
                .map_err(|e| host_err(&format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }

    /// Require `oras` and install `jq`, `yq` and `helm` when absent.
    ///
    /// Returns the names of tools that were installed.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HostPrep`] if `oras` is missing or an install
    /// fails.
    pub async fn verify_tools(&self) -> Result<Vec<String>> {
        if !self.runner.has_program("oras") {
            return Err(InstallError::HostPrep(
                "oras not found on PATH; install it from https://oras.land/docs/installation"
                    .to_string(),
            ));
        }

        let mut installed = Vec::new();

        if !self.runner.has_program("jq") {
            let apt = CommandSpec::new("apt-get")
                .args(["install", "-y", "jq"])
                .env("NEEDRESTART_MODE", "a")
                .env("DEBIAN_FRONTEND", "noninteractive")
                .privileged();
            run_checked(self.runner, &apt)
                .await
                .map_err(|e| host_err("installing jq", e))?;
            installed.push("jq".to_string());
        }

        if !self.runner.has_program("yq") {
            let bytes = self.download(&self.sources.yq_url).await?;
            self.install_binary("yq", &bytes).await?;
            installed.push("yq".to_string());
        }

        if !self.runner.has_program("helm") {
            let archive = self.download(&self.sources.helm_url).await?;
            let binary = extract_from_tarball(&archive, "helm")?;
            self.install_binary("helm", &binary).await?;
            installed.push("helm".to_string());
        }

        for tool in &installed {
            info!(tool = %tool, "Installed missing tool");
        }
        Ok(installed)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "GET request");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| host_err(&format!("downloading {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(host_err(&format!("downloading {url}"), status));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| host_err(&format!("downloading {url}"), e))?;
        Ok(bytes.to_vec())
    }

    async fn install_binary(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new().map_err(|e| host_err("creating temp file", e))?;
        tmp.write_all(bytes)
            .map_err(|e| host_err("writing temp file", e))?;

        let dest = self.paths.bin_dir.join(name);
        let install = CommandSpec::new("install")
            .args(["-m", "0755"])
            .path_arg(tmp.path())
            .path_arg(&dest)
            .privileged();
        run_checked(self.runner, &install)
            .await
            .map_err(|e| host_err(&format!("installing {name}"), e))?;
        Ok(())
    }
}

/// Inotify lines not yet present as active settings in `existing`.
#[must_use]
pub fn missing_sysctl_lines(existing: &str) -> Vec<String> {
    let active: Vec<&str> = existing
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .collect();

    INOTIFY_KEYS
        .iter()
        .filter(|key| {
            !active.iter().any(|line| {
                line.split_once('=')
                    .is_some_and(|(k, _)| k.trim() == **key)
            })
        })
        .map(|key| format!("{key} = {INOTIFY_LIMIT}"))
        .collect()
}

/// Pull the file called `name` out of a gzipped tarball.
fn extract_from_tarball(archive: &[u8], name: &str) -> Result<Vec<u8>> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let entries = tar.entries().map_err(|e| host_err("reading archive", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| host_err("reading archive", e))?;
        let is_match = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|f| f == name))
            .unwrap_or(false);
        if is_match {
            let mut out = Vec::new();
            std::io::copy(&mut entry, &mut out).map_err(|e| host_err("reading archive", e))?;
            return Ok(out);
        }
    }

    Err(InstallError::HostPrep(format!("{name} not found in archive")))
}

/// Whether `path` holds a non-empty regular file.
#[must_use]
pub fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}
