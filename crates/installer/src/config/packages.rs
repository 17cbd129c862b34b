//! Package manifest.
//!
//! Maps package names to the application tags they group. The set of app
//! tags across all packages is the universe `orch.enabled` is validated
//! against.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const EMBEDDED_MANIFEST: &str = include_str!("packages.yaml");

/// One deployable application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Extra installer bundle staged when this app is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,
}

/// A named group of apps offered in simple mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub apps: BTreeMap<String, App>,
}

/// The full manifest, keyed by package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageManifest {
    pub packages: BTreeMap<String, Package>,
}

impl PackageManifest {
    /// The manifest shipped with the installer.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded document does not parse.
    pub fn embedded() -> Result<Self> {
        Self::from_yaml_str(EMBEDDED_MANIFEST).context("Embedded package manifest is malformed")
    }

    /// Parse a manifest from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML or an app tag claimed by two packages.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml).context("Failed to parse package manifest")?;

        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for (pkg, package) in &manifest.packages {
            for tag in package.apps.keys() {
                if let Some(other) = owners.insert(tag, pkg) {
                    anyhow::bail!("App '{tag}' is declared by both '{other}' and '{pkg}'");
                }
            }
        }

        Ok(manifest)
    }

    /// Read a manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read package manifest {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Every known app tag.
    #[must_use]
    pub fn app_tags(&self) -> BTreeSet<String> {
        self.packages
            .values()
            .flat_map(|p| p.apps.keys().cloned())
            .collect()
    }

    #[must_use]
    pub fn is_known_app(&self, tag: &str) -> bool {
        self.packages.values().any(|p| p.apps.contains_key(tag))
    }

    #[must_use]
    pub fn is_known_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Union of the apps of the named packages. Unknown names are skipped.
    #[must_use]
    pub fn expand<'a, I>(&self, packages: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        packages
            .into_iter()
            .filter_map(|name| self.packages.get(name))
            .flat_map(|p| p.apps.keys().cloned())
            .collect()
    }

    /// Packages whose apps are all contained in `enabled`.
    #[must_use]
    pub fn packages_covered_by(&self, enabled: &BTreeSet<String>) -> BTreeSet<String> {
        self.packages
            .iter()
            .filter(|(_, p)| p.apps.keys().all(|tag| enabled.contains(tag)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Extra installer bundles required by the enabled apps, in tag order.
    #[must_use]
    pub fn installers_for(&self, enabled: &BTreeSet<String>) -> Vec<String> {
        let mut installers = Vec::new();
        for tag in enabled {
            let bundle = self
                .packages
                .values()
                .find_map(|p| p.apps.get(tag))
                .and_then(|app| app.installer.clone());
            if let Some(bundle) = bundle {
                if !installers.contains(&bundle) {
                    installers.push(bundle);
                }
            }
        }
        installers
    }

    /// `(package name, package)` pairs sorted by display name.
    #[must_use]
    pub fn sorted_packages(&self) -> Vec<(&str, &Package)> {
        let mut list: Vec<_> = self.packages.iter().map(|(k, v)| (k.as_str(), v)).collect();
        list.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        list
    }

    /// `(app tag, app)` pairs across all packages sorted by display name.
    #[must_use]
    pub fn sorted_apps(&self) -> Vec<(&str, &App)> {
        let mut list: Vec<_> = self
            .packages
            .values()
            .flat_map(|p| p.apps.iter().map(|(k, v)| (k.as_str(), v)))
            .collect();
        list.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        list
    }
}
