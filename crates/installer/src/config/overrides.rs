//! Override layer for the materialized cluster profile.
//!
//! Writes values derived from the user config into
//! `orch-configs/clusters/<profile>.yaml` inside the extracted repository
//! tree. Keys not listed here are left as they are.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use super::{Config, InstallSettings};
use crate::error::{InstallError, Result};

/// Values written into the cluster profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileOverrides {
    pub cluster_domain: String,
    pub argo_ip: String,
    pub traefik_ip: String,
    pub nginx_ip: String,
    pub sre_tls: bool,
    pub sre_ca: bool,
    pub smtp_skip_verify: bool,
}

impl ProfileOverrides {
    #[must_use]
    pub fn from_config(config: &Config, settings: &InstallSettings) -> Self {
        Self {
            cluster_domain: config.cluster_domain(),
            argo_ip: config.onprem.argo_ip.clone(),
            traefik_ip: config.onprem.traefik_ip.clone(),
            nginx_ip: config.onprem.nginx_ip.clone(),
            sre_tls: settings.sre_tls,
            sre_ca: !config.sre.ca_secret.is_empty(),
            smtp_skip_verify: settings.smtp_skip_verify,
        }
    }

    /// Apply to an in-memory profile document.
    pub fn apply(&self, doc: &mut Value) {
        if !self.cluster_domain.is_empty() {
            set_path(doc, &["argo", "clusterDomain"], self.cluster_domain.clone().into());
        }

        set_path(doc, &["argo", "o11y", "sre", "tls", "enabled"], self.sre_tls.into());
        if self.sre_tls && self.sre_ca {
            set_path(doc, &["argo", "o11y", "sre", "tls", "caSecretEnabled"], true.into());
        }

        if self.smtp_skip_verify {
            set_path(
                doc,
                &["argo", "o11y", "alertingMonitor", "smtp", "insecureSkipVerify"],
                true.into(),
            );
        }

        let metallb = ["postCustomTemplateOverwrite", "metallb-config"];
        for (key, ip) in [
            ("ArgoIP", &self.argo_ip),
            ("TraefikIP", &self.traefik_ip),
            ("NginxIP", &self.nginx_ip),
        ] {
            set_path(doc, &[metallb[0], metallb[1], key], ip.clone().into());
        }
    }

    /// Rewrite the profile file at `path` in place.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::LocalIo`] if the file cannot be read or
    /// written and [`InstallError::ConfigInvalid`] if it is not YAML.
    pub fn apply_to_file(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        let mut doc: Value = if content.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                InstallError::invalid("profile", path.display().to_string(), e.to_string())
            })?
        };

        self.apply(&mut doc);

        let rendered = serde_yaml::to_string(&doc)
            .map_err(|e| InstallError::invalid("profile", path.display().to_string(), e.to_string()))?;
        std::fs::write(path, rendered).map_err(|e| InstallError::io(path, e))?;

        info!(
            domain = %self.cluster_domain,
            "Applied overrides to {}",
            path.display()
        );
        Ok(())
    }
}

/// Set `value` at `path`, creating intermediate mappings and replacing any
/// non-mapping node on the way.
pub fn set_path(doc: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *doc = value;
        return;
    };

    let mut node = doc;
    for key in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = node else { return };
        node = map
            .entry(Value::String((*key).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        debug!(path = %path.join("."), "Setting profile value");
        map.insert(Value::String((*last).to_string()), value);
    }
}
