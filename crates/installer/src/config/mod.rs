//! Orchestrator configuration document.
//!
//! This module defines the single declarative document the installer
//! consumes. It is owned by the configuration phase: it is loaded (and
//! migrated) from disk, elicited interactively, validated, and saved back.
//! Later phases only read it.

pub mod io;
pub mod migrate;
pub mod overrides;
pub mod packages;
pub mod settings;
pub mod validate;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use io::{load, save, LoadOutcome, LoadSource};
pub use packages::PackageManifest;
pub use settings::InstallSettings;

/// Current schema version of the config document.
pub const CURRENT_VERSION: u32 = 2;

/// Oldest schema version that can still be migrated.
pub const MIN_VERSION: u32 = 1;

/// Default first-login password for orchestrator users.
pub const DEFAULT_ORCH_PASSWORD: &str = "ChangeMeOn1stLogin!";

/// Supported deployment scales (number of edge nodes).
pub const SCALES: [u32; 5] = [10, 100, 500, 1000, 10000];

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Infrastructure provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Amazon Web Services.
    Aws,
    /// On-premise host.
    #[default]
    Onprem,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Onprem => write!(f, "onprem"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "onprem" | "on-prem" => Ok(Self::Onprem),
            _ => Err(anyhow::anyhow!(
                "Unknown provider: {s}. Supported: aws, onprem"
            )),
        }
    }
}

/// Whether re-runs regenerate admin passwords or keep the ones in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PasswordPolicy {
    /// Every run writes freshly generated passwords.
    #[default]
    Regenerate,
    /// Generated passwords already present in the cluster are kept.
    Preserve,
}

impl std::fmt::Display for PasswordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regenerate => write!(f, "regenerate"),
            Self::Preserve => write!(f, "preserve"),
        }
    }
}

impl std::str::FromStr for PasswordPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regenerate" => Ok(Self::Regenerate),
            "preserve" => Ok(Self::Preserve),
            _ => Err(anyhow::anyhow!(
                "Unknown password policy: {s}. Supported: regenerate, preserve"
            )),
        }
    }
}

/// Deployment-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Global {
    /// Deployment name, lowercase alphanumeric.
    pub orch_name: String,
    /// Parent domain, not including the deployment name.
    pub parent_domain: String,
    /// Used for certificates and alert delivery.
    pub admin_email: String,
    /// Target number of edge nodes.
    pub scale: u32,
}

impl Default for Global {
    fn default() -> Self {
        Self {
            orch_name: String::new(),
            parent_domain: String::new(),
            admin_email: String::new(),
            scale: SCALES[0],
        }
    }
}

/// External identity provider settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Advanced {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub azure_ad_refresh_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub azure_ad_token_endpoint: String,
}

/// AWS-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Aws {
    pub region: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub customer_tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cache_registry: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jump_host_whitelist: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vpc_id: String,
    /// Reserved; not consumed by the on-prem path.
    #[serde(skip_serializing_if = "is_default")]
    pub reduce_ns_ttl: bool,
    /// Reserved; not consumed by the on-prem path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub eks_dns_ip: String,
}

/// On-prem settings: load balancer IPs and optional Docker Hub credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnPrem {
    #[serde(rename = "argoIP")]
    pub argo_ip: String,
    #[serde(rename = "traefikIP")]
    pub traefik_ip: String,
    #[serde(rename = "nginxIP")]
    pub nginx_ip: String,
    #[serde(rename = "dockerUsername", skip_serializing_if = "String::is_empty")]
    pub docker_username: String,
    #[serde(rename = "dockerToken", skip_serializing_if = "String::is_empty")]
    pub docker_token: String,
}

impl OnPrem {
    /// Docker credentials, only when both halves are present.
    #[must_use]
    pub fn docker_credentials(&self) -> Option<(&str, &str)> {
        if self.docker_username.is_empty() || self.docker_token.is_empty() {
            None
        } else {
            Some((&self.docker_username, &self.docker_token))
        }
    }
}

/// Orchestrator component selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Orch {
    /// Enabled application tags.
    pub enabled: BTreeSet<String>,
    /// First-login password for orchestrator users.
    pub default_password: String,
    #[serde(skip_serializing_if = "is_default")]
    pub password_policy: PasswordPolicy,
}

impl Default for Orch {
    fn default() -> Self {
        Self {
            enabled: BTreeSet::new(),
            default_password: String::new(),
            password_policy: PasswordPolicy::default(),
        }
    }
}

/// User-supplied TLS material (PEM).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cert {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_cert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_ca: String,
}

/// SRE exporter destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sre {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret_url: String,
    /// Destination CA certificate (PEM).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_secret: String,
}

/// Alert email delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Smtp {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from: String,
}

/// Outbound proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Proxy {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub https_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub socks_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
}

/// Values filled in by the installer during a run. Never user-edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Generated {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub deployment_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kube_config: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_cert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_ca: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cache_registry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vpc_id: String,
}

/// The full configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub global: Global,
    #[serde(default, skip_serializing_if = "is_default")]
    pub advanced: Advanced,
    #[serde(default, skip_serializing_if = "is_default")]
    pub aws: Aws,
    #[serde(default, skip_serializing_if = "is_default")]
    pub onprem: OnPrem,
    #[serde(default)]
    pub orch: Orch,
    #[serde(default, skip_serializing_if = "is_default")]
    pub proxy: Proxy,
    #[serde(default, skip_serializing_if = "is_default")]
    pub cert: Cert,
    #[serde(default, skip_serializing_if = "is_default")]
    pub sre: Sre,
    #[serde(default, skip_serializing_if = "is_default")]
    pub smtp: Smtp,
    #[serde(default, skip_serializing_if = "is_default")]
    pub generated: Generated,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Fresh document at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION,
            provider: Provider::default(),
            global: Global::default(),
            advanced: Advanced::default(),
            aws: Aws::default(),
            onprem: OnPrem::default(),
            orch: Orch::default(),
            proxy: Proxy::default(),
            cert: Cert::default(),
            sre: Sre::default(),
            smtp: Smtp::default(),
            generated: Generated::default(),
        }
    }

    /// Fully qualified domain of this deployment.
    #[must_use]
    pub fn cluster_domain(&self) -> String {
        if self.global.orch_name.is_empty() {
            self.global.parent_domain.clone()
        } else {
            format!("{}.{}", self.global.orch_name, self.global.parent_domain)
        }
    }

    /// Whether an application tag is enabled.
    #[must_use]
    pub fn is_enabled(&self, tag: &str) -> bool {
        self.orch.enabled.contains(tag)
    }

    /// Fill defaults for values the user left empty.
    pub fn fill_defaults(&mut self) {
        if self.orch.default_password.is_empty() {
            self.orch.default_password = DEFAULT_ORCH_PASSWORD.to_string();
        }
        if self.generated.deployment_id.is_empty() {
            self.generated.deployment_id = new_deployment_id();
        }
    }
}

/// Short lowercase identifier for state and bucket prefixes.
fn new_deployment_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.version, CURRENT_VERSION);
        assert_eq!(config.provider, Provider::Onprem);
        assert_eq!(config.global.scale, 10);
        assert!(config.orch.enabled.is_empty());
        assert_eq!(config.orch.password_policy, PasswordPolicy::Regenerate);
    }

    #[test]
    fn test_fill_defaults_keeps_user_values() {
        let mut config = Config::new();
        config.fill_defaults();
        assert_eq!(config.orch.default_password, DEFAULT_ORCH_PASSWORD);
        assert_eq!(config.generated.deployment_id.len(), 12);

        let id = config.generated.deployment_id.clone();
        config.orch.default_password = "Other1!".into();
        config.fill_defaults();
        assert_eq!(config.orch.default_password, "Other1!");
        assert_eq!(config.generated.deployment_id, id);
    }

    #[test]
    fn test_cluster_domain() {
        let mut config = Config::new();
        config.global.orch_name = "demo".into();
        config.global.parent_domain = "example.com".into();
        assert_eq!(config.cluster_domain(), "demo.example.com");
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("aws".parse::<Provider>().unwrap(), Provider::Aws);
        assert_eq!("OnPrem".parse::<Provider>().unwrap(), Provider::Onprem);
        assert!("azure".parse::<Provider>().is_err());
    }

    #[test]
    fn test_password_policy_parsing() {
        assert_eq!(
            "preserve".parse::<PasswordPolicy>().unwrap(),
            PasswordPolicy::Preserve
        );
        assert!("keep".parse::<PasswordPolicy>().is_err());
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let config = Config::new();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("version: 2"));
        assert!(!yaml.contains("aws:"));
        assert!(!yaml.contains("smtp:"));
        assert!(!yaml.contains("passwordPolicy"));
    }

    #[test]
    fn test_onprem_keys_use_ip_suffix() {
        let mut config = Config::new();
        config.onprem.argo_ip = "10.0.0.1".into();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("argoIP: 10.0.0.1"));
    }

    #[test]
    fn test_docker_credentials_need_both_halves() {
        let mut onprem = OnPrem::default();
        onprem.docker_username = "user".into();
        assert!(onprem.docker_credentials().is_none());
        onprem.docker_token = "token".into();
        assert_eq!(onprem.docker_credentials(), Some(("user", "token")));
    }
}
