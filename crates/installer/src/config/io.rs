//! Loading and saving the config document.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use super::{migrate, validate, Config, PackageManifest, CURRENT_VERSION};
use crate::error::{InstallError, Result};

/// Where a loaded document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// No file on disk; a fresh document was synthesized.
    Fresh,
    /// The file was already at the current version.
    Current,
    /// The file was migrated from an older version.
    Migrated { from: u32 },
}

/// Result of [`load`].
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub config: Config,
    pub source: LoadSource,
}

impl LoadOutcome {
    /// Whether the document should be written back even without edits.
    #[must_use]
    pub fn needs_save(&self) -> bool {
        !matches!(self.source, LoadSource::Current)
    }
}

/// Load the config at `path`, migrating older versions.
///
/// # Errors
///
/// Returns [`InstallError::LocalIo`] if the file cannot be read,
/// [`InstallError::ConfigInvalid`] if it does not parse or lacks an integer
/// `version`, and [`InstallError::ConfigVersionUnsupported`] for unknown
/// versions.
pub fn load(path: &Path, manifest: &PackageManifest) -> Result<LoadOutcome> {
    if !path.exists() {
        info!("No config at {}, starting from a fresh document", path.display());
        return Ok(LoadOutcome {
            config: Config::new(),
            source: LoadSource::Fresh,
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
    let raw: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| InstallError::invalid("<document>", path.display().to_string(), e.to_string()))?;

    let version = match raw.get("version") {
        None => {
            return Err(InstallError::invalid(
                "version",
                "",
                "version not found in config file",
            ))
        }
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                InstallError::invalid(
                    "version",
                    format!("{v:?}"),
                    "version is not an integer in config file",
                )
            })?,
    };
    debug!(version, path = %path.display(), "Loaded config document");

    let config = migrate::migrate(version, raw, manifest)?;
    let source = if version == CURRENT_VERSION {
        LoadSource::Current
    } else {
        LoadSource::Migrated { from: version }
    };

    Ok(LoadOutcome { config, source })
}

/// Validate and atomically write `config` to `path` at the current version.
///
/// # Errors
///
/// Returns [`InstallError::ConfigInvalid`] if validation fails (nothing is
/// written) and [`InstallError::LocalIo`] on write failures.
pub fn save(config: &mut Config, path: &Path, manifest: &PackageManifest) -> Result<()> {
    config.version = CURRENT_VERSION;
    validate::validate(config, manifest)?;

    let yaml = serde_yaml::to_string(config)
        .map_err(|e| InstallError::invalid("<document>", "", e.to_string()))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| InstallError::io(dir, e))?;
    tmp.write_all(yaml.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| InstallError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| InstallError::io(path, e.error))?;

    info!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::sample_onprem;
    use tempfile::TempDir;

    fn manifest() -> PackageManifest {
        PackageManifest::embedded().unwrap()
    }

    #[test]
    fn test_missing_file_yields_fresh_document() {
        let dir = TempDir::new().unwrap();
        let outcome = load(&dir.path().join("absent.yaml"), &manifest()).unwrap();
        assert_eq!(outcome.source, LoadSource::Fresh);
        assert_eq!(outcome.config, Config::new());
        assert!(outcome.needs_save());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = sample_onprem();
        config.smtp.port = "587".into();
        config.aws.jump_host_whitelist = vec!["1.2.3.4/32".into()];

        save(&mut config, &path, &manifest()).unwrap();
        let outcome = load(&path, &manifest()).unwrap();
        assert_eq!(outcome.source, LoadSource::Current);
        assert_eq!(outcome.config, config);
    }

    #[test]
    fn test_save_uses_two_space_indent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        save(&mut sample_onprem(), &path, &manifest()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("version: 2\n"));
        assert!(text.contains("\n  orchName: demo\n"));
    }

    #[test]
    fn test_invalid_config_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "original").unwrap();

        let mut config = sample_onprem();
        config.global.orch_name = "Demo-1".into();
        let err = save(&mut config, &path, &manifest()).unwrap_err();
        assert!(matches!(err, InstallError::ConfigInvalid { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn test_missing_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "provider: onprem\n").unwrap();
        let err = load(&path, &manifest()).unwrap_err();
        assert!(err.to_string().contains("version not found"));
    }

    #[test]
    fn test_non_integer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "version: two\n").unwrap();
        let err = load(&path, &manifest()).unwrap_err();
        assert!(err.to_string().contains("not an integer"));
    }

    #[test]
    fn test_future_version_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "version: 3\n").unwrap();
        let err = load(&path, &manifest()).unwrap_err();
        assert!(matches!(err, InstallError::ConfigVersionUnsupported(3)));
    }

    #[test]
    fn test_v1_file_reports_migration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "version: 1\nenabled: [fps]\n").unwrap();
        let outcome = load(&path, &manifest()).unwrap();
        assert_eq!(outcome.source, LoadSource::Migrated { from: 1 });
        assert!(outcome.needs_save());
    }
}
