//! Run settings and the environment overlay.
//!
//! [`InstallSettings`] holds everything decided at the CLI edge for one
//! invocation. [`EnvOverlay`] is the only place the configuration engine
//! reads process environment; it is captured once and applied to the
//! loaded document.

use std::path::PathBuf;

use tracing::debug;

use super::Config;

pub const DEFAULT_RELEASE_SERVICE_URL: &str = "registry-rs.edgeorchestration.intel.com";
pub const DEFAULT_PROFILE: &str = "onprem";
pub const DEV_PROFILE: &str = "onprem-dev";
pub const DEFAULT_DEPLOY_VERSION: &str = "v3.1.0";
pub const DEFAULT_GITEA_IMAGE_REGISTRY: &str = "docker.io";
pub const DEFAULT_CONFIG_PATH: &str = "onprem-config.yaml";
pub const INSTALLER_REGISTRY_PATH: &str = "edge-orch/common/files";
pub const ARCHIVE_REGISTRY_PATH: &str = "edge-orch/common/files/orchestrator";

pub const DEFAULT_SRE_USERNAME: &str = "sre";
pub const DEFAULT_SRE_PASSWORD: &str = "123";
pub const DEFAULT_SRE_DEST_URL: &str =
    "http://sre-exporter-destination.orch-sre.svc.cluster.local:8428/api/v1/write";
pub const DEFAULT_SMTP_ADDRESS: &str = "smtp.serveraddress.com";
pub const DEFAULT_SMTP_PORT: &str = "587";
pub const DEFAULT_SMTP_HEADER: &str = "foo bar <foo@bar.com>";
pub const DEFAULT_SMTP_USERNAME: &str = "uSeR";
pub const DEFAULT_SMTP_PASSWORD: &str = "T@123sfD";

/// Settings for one installer run, resolved from flags and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSettings {
    /// User config document.
    pub config_path: PathBuf,
    /// Package manifest override; the embedded one is used when unset.
    pub packages_path: Option<PathBuf>,
    /// Directory holding `installers/` and `repo_archives/`.
    pub work_dir: PathBuf,
    /// Registry host.
    pub release_service_url: String,
    pub installer_path: String,
    pub archive_path: String,
    pub deploy_version: String,
    /// Cluster profile under `orch-configs/clusters/`.
    pub profile: String,
    pub gitea_image_registry: String,
    /// Where the cluster kubeconfig is copied for the invoking user.
    pub kubeconfig: PathBuf,
    /// CA bundle for the registry and GitOps endpoints.
    pub ca_cert: Option<PathBuf>,
    /// SRE destination CA bundle.
    pub sre_ca_cert: Option<PathBuf>,
    pub sre_tls: bool,
    pub smtp_skip_verify: bool,
    pub skip_download: bool,
    pub write_config: bool,
    pub assume_yes: bool,
    pub interactive: bool,
    /// Ask every optional group without a per-group confirmation.
    pub expert_mode: bool,
    pub trace: bool,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            packages_path: None,
            work_dir: PathBuf::from("."),
            release_service_url: DEFAULT_RELEASE_SERVICE_URL.to_string(),
            installer_path: INSTALLER_REGISTRY_PATH.to_string(),
            archive_path: ARCHIVE_REGISTRY_PATH.to_string(),
            deploy_version: DEFAULT_DEPLOY_VERSION.to_string(),
            profile: DEFAULT_PROFILE.to_string(),
            gitea_image_registry: DEFAULT_GITEA_IMAGE_REGISTRY.to_string(),
            kubeconfig: default_kubeconfig_path(),
            ca_cert: None,
            sre_ca_cert: None,
            sre_tls: false,
            smtp_skip_verify: false,
            skip_download: false,
            write_config: false,
            assume_yes: false,
            interactive: true,
            expert_mode: false,
            trace: false,
        }
    }
}

/// `$KUBECONFIG` when set, otherwise `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path() -> PathBuf {
    if let Some(path) = std::env::var_os("KUBECONFIG").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
        .join("config")
}

impl InstallSettings {
    /// Staging directory for installer bundles.
    #[must_use]
    pub fn installers_dir(&self) -> PathBuf {
        self.work_dir.join("installers")
    }

    /// Staging directory for repository archives.
    #[must_use]
    pub fn archives_dir(&self) -> PathBuf {
        self.work_dir.join("repo_archives")
    }
}

/// Environment values the configuration engine consumes, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    pub argo_ip: Option<String>,
    pub traefik_ip: Option<String>,
    pub nginx_ip: Option<String>,
    pub docker_username: Option<String>,
    pub docker_password: Option<String>,
    pub orch_default_password: Option<String>,
    pub sre_username: Option<String>,
    pub sre_password: Option<String>,
    pub sre_dest_url: Option<String>,
    pub sre_dest_ca_cert: Option<String>,
    pub smtp_address: Option<String>,
    pub smtp_port: Option<String>,
    pub smtp_header: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub azuread_refresh_token: Option<String>,
}

fn fill(target: &mut String, value: Option<&String>) {
    if target.is_empty() {
        if let Some(v) = value {
            target.clone_from(v);
        }
    }
}

fn fill_or(target: &mut String, value: Option<&String>, default: &str) {
    fill(target, value);
    if target.is_empty() {
        *target = default.to_string();
    }
}

impl EnvOverlay {
    /// Capture from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Capture through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            argo_ip: get("ARGO_IP"),
            traefik_ip: get("TRAEFIK_IP"),
            nginx_ip: get("NGINX_IP"),
            docker_username: get("DOCKER_USERNAME"),
            docker_password: get("DOCKER_PASSWORD"),
            orch_default_password: get("ORCH_DEFAULT_PASSWORD"),
            sre_username: get("SRE_USERNAME"),
            sre_password: get("SRE_PASSWORD"),
            sre_dest_url: get("SRE_DEST_URL"),
            sre_dest_ca_cert: get("SRE_DEST_CA_CERT"),
            smtp_address: get("SMTP_ADDRESS"),
            smtp_port: get("SMTP_PORT"),
            smtp_header: get("SMTP_HEADER"),
            smtp_username: get("SMTP_USERNAME"),
            smtp_password: get("SMTP_PASSWORD"),
            azuread_refresh_token: get("AZUREAD_REFRESH_TOKEN"),
        }
    }

    /// Fill user-facing fields that are still empty. Runs before elicitation,
    /// so anything applied here ends up in the saved document.
    pub fn apply(&self, config: &mut Config) {
        fill(&mut config.onprem.argo_ip, self.argo_ip.as_ref());
        fill(&mut config.onprem.traefik_ip, self.traefik_ip.as_ref());
        fill(&mut config.onprem.nginx_ip, self.nginx_ip.as_ref());
        fill(&mut config.onprem.docker_username, self.docker_username.as_ref());
        fill(&mut config.onprem.docker_token, self.docker_password.as_ref());
        fill(
            &mut config.advanced.azure_ad_refresh_token,
            self.azuread_refresh_token.as_ref(),
        );
        debug!("Applied environment overlay");
    }

    /// Fill SRE and SMTP values needed for secrets, falling back to the
    /// documented defaults. Runs after save and only touches the in-memory
    /// document.
    pub fn apply_runtime_defaults(&self, config: &mut Config) {
        let sre_password = self
            .sre_password
            .as_ref()
            .or(self.orch_default_password.as_ref());

        fill_or(&mut config.sre.username, self.sre_username.as_ref(), DEFAULT_SRE_USERNAME);
        fill_or(&mut config.sre.password, sre_password, DEFAULT_SRE_PASSWORD);
        fill_or(&mut config.sre.secret_url, self.sre_dest_url.as_ref(), DEFAULT_SRE_DEST_URL);
        fill(&mut config.sre.ca_secret, self.sre_dest_ca_cert.as_ref());

        fill_or(&mut config.smtp.url, self.smtp_address.as_ref(), DEFAULT_SMTP_ADDRESS);
        fill_or(&mut config.smtp.port, self.smtp_port.as_ref(), DEFAULT_SMTP_PORT);
        fill_or(&mut config.smtp.from, self.smtp_header.as_ref(), DEFAULT_SMTP_HEADER);
        fill_or(&mut config.smtp.username, self.smtp_username.as_ref(), DEFAULT_SMTP_USERNAME);
        fill_or(&mut config.smtp.password, self.smtp_password.as_ref(), DEFAULT_SMTP_PASSWORD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn overlay(pairs: &[(&str, &str)]) -> EnvOverlay {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EnvOverlay::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_settings_defaults() {
        let settings = InstallSettings::default();
        assert_eq!(settings.release_service_url, DEFAULT_RELEASE_SERVICE_URL);
        assert_eq!(settings.profile, "onprem");
        assert_eq!(settings.deploy_version, "v3.1.0");
        assert_eq!(settings.installers_dir(), PathBuf::from("./installers"));
        assert_eq!(settings.archives_dir(), PathBuf::from("./repo_archives"));
    }

    #[test]
    fn test_overlay_never_overwrites() {
        let mut config = Config::new();
        config.onprem.argo_ip = "10.0.0.9".into();
        overlay(&[("ARGO_IP", "10.0.0.1"), ("NGINX_IP", "10.0.0.3")]).apply(&mut config);
        assert_eq!(config.onprem.argo_ip, "10.0.0.9");
        assert_eq!(config.onprem.nginx_ip, "10.0.0.3");
        assert!(config.onprem.traefik_ip.is_empty());
    }

    #[test]
    fn test_empty_env_counts_as_unset() {
        let env = overlay(&[("DOCKER_USERNAME", "")]);
        assert!(env.docker_username.is_none());
    }

    #[test]
    fn test_runtime_defaults() {
        let mut config = Config::new();
        overlay(&[]).apply_runtime_defaults(&mut config);
        assert_eq!(config.sre.username, "sre");
        assert_eq!(config.sre.password, "123");
        assert_eq!(config.sre.secret_url, DEFAULT_SRE_DEST_URL);
        assert!(config.sre.ca_secret.is_empty());
        assert_eq!(config.smtp.port, "587");
        assert_eq!(config.smtp.from, "foo bar <foo@bar.com>");
        assert_eq!(config.smtp.password, "T@123sfD");
    }

    #[test]
    fn test_sre_password_falls_back_to_orch_default() {
        let mut config = Config::new();
        overlay(&[("ORCH_DEFAULT_PASSWORD", "Secret1!")]).apply_runtime_defaults(&mut config);
        assert_eq!(config.sre.password, "Secret1!");

        let mut config = Config::new();
        overlay(&[("ORCH_DEFAULT_PASSWORD", "Secret1!"), ("SRE_PASSWORD", "sre-pw")])
            .apply_runtime_defaults(&mut config);
        assert_eq!(config.sre.password, "sre-pw");
    }

    #[test]
    #[serial]
    fn test_kubeconfig_path_prefers_env() {
        std::env::set_var("KUBECONFIG", "/tmp/kc.yaml");
        let path = default_kubeconfig_path();
        std::env::remove_var("KUBECONFIG");
        assert_eq!(path, PathBuf::from("/tmp/kc.yaml"));
        assert!(default_kubeconfig_path().ends_with(".kube/config"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("SMTP_ADDRESS", "mail.example.com");
        let env = EnvOverlay::from_env();
        std::env::remove_var("SMTP_ADDRESS");
        assert_eq!(env.smtp_address.as_deref(), Some("mail.example.com"));
    }
}
