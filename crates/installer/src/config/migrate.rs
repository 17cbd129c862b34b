//! Schema migrations.
//!
//! Each step is a total function from one version's shape to the next.
//! Loading chains them until the document reaches [`CURRENT_VERSION`].

use serde::Deserialize;
use tracing::{info, warn};

use super::{validate, Config, PackageManifest, Provider, CURRENT_VERSION, DEFAULT_ORCH_PASSWORD, MIN_VERSION};
use crate::error::{InstallError, Result};

/// Version 1 document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct V1 {
    provider: String,
    global: V1Global,
    aws: V1Aws,
    onprem: V1OnPrem,
    enabled: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct V1Global {
    cluster_name: String,
    cluster_domain: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct V1Aws {
    region: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct V1OnPrem {
    ip: String,
}

const V1_FALLBACK_NAME: &str = "orch";
const V1_FALLBACK_DOMAIN: &str = "cluster.onprem";
/// Placeholder for load balancer IPs a version 1 document lacks; the
/// operator is expected to replace it before installing.
const V1_FALLBACK_IP: &str = "127.0.0.1";
const V1_FALLBACK_REGION: &str = "us-west-2";

/// Bring a generic document at `version` up to the current schema.
///
/// # Errors
///
/// Returns [`InstallError::ConfigVersionUnsupported`] for unknown versions and
/// [`InstallError::ConfigInvalid`] if a step cannot decode its input.
pub fn migrate(
    version: u32,
    raw: serde_yaml::Value,
    manifest: &PackageManifest,
) -> Result<Config> {
    if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
        return Err(InstallError::ConfigVersionUnsupported(version));
    }

    match version {
        1 => {
            let v1: V1 = decode(raw, 1)?;
            info!("Migrating config from version 1 to {CURRENT_VERSION}");
            migrate_v1_v2(v1, manifest)
        }
        _ => decode(raw, CURRENT_VERSION),
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: serde_yaml::Value, version: u32) -> Result<T> {
    serde_yaml::from_value(raw).map_err(|e| {
        InstallError::invalid(
            "version",
            version.to_string(),
            format!("failed to decode config file into version {version}: {e}"),
        )
    })
}

fn migrate_v1_v2(v1: V1, manifest: &PackageManifest) -> Result<Config> {
    let mut config = Config::new();

    config.provider = match v1.provider.as_str() {
        "" | "onprem" => Provider::Onprem,
        "aws" => Provider::Aws,
        other => {
            return Err(InstallError::invalid(
                "provider",
                other,
                "only aws and onprem are supported",
            ))
        }
    };

    let name: String = v1
        .global
        .cluster_name
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(15)
        .collect();
    config.global.orch_name = if name.is_empty() {
        V1_FALLBACK_NAME.to_string()
    } else {
        name
    };
    config.global.parent_domain = or_fallback(
        "global.parentDomain",
        v1.global.cluster_domain.to_lowercase(),
        validate::parent_domain,
        V1_FALLBACK_DOMAIN,
    );
    config.global.admin_email = or_fallback(
        "global.adminEmail",
        format!("admin@{}", config.global.parent_domain),
        validate::email,
        &format!("admin@{V1_FALLBACK_DOMAIN}"),
    );

    if config.provider == Provider::Aws {
        config.aws.region = or_fallback("aws.region", v1.aws.region, validate::aws_region, V1_FALLBACK_REGION);
    } else {
        config.aws.region = v1.aws.region;
    }

    let ip = if config.provider == Provider::Onprem {
        or_fallback("onprem.argoIP", v1.onprem.ip, validate::ipv4, V1_FALLBACK_IP)
    } else {
        v1.onprem.ip
    };
    config.onprem.argo_ip.clone_from(&ip);
    config.onprem.traefik_ip.clone_from(&ip);
    config.onprem.nginx_ip = ip;

    for entry in &v1.enabled {
        if manifest.is_known_package(entry) {
            config.orch.enabled.extend(manifest.expand([entry.as_str()]));
        } else if manifest.is_known_app(entry) {
            config.orch.enabled.insert(entry.clone());
        } else {
            warn!(component = %entry, "Dropping unknown component from version 1 config");
        }
    }
    config.orch.enabled.insert("fps".to_string());
    if validate::enabled_set(&config.orch.enabled, |tag| manifest.is_known_app(tag)).is_err() {
        warn!("Dropping ui from version 1 config: no component for it to manage");
        config.orch.enabled.remove("ui");
    }
    config.orch.default_password = DEFAULT_ORCH_PASSWORD.to_string();

    Ok(config)
}

/// `value` when `rule` accepts it, otherwise `fallback` with a warning.
fn or_fallback(
    field: &str,
    value: String,
    rule: fn(&str) -> std::result::Result<(), String>,
    fallback: &str,
) -> String {
    if rule(&value).is_ok() {
        return value;
    }
    if !value.is_empty() {
        warn!(field, value = %value, "Replacing invalid value from version 1 config");
    } else {
        warn!(field, fallback, "Version 1 config has no value, using placeholder");
    }
    fallback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate;

    fn manifest() -> PackageManifest {
        PackageManifest::embedded().unwrap()
    }

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_v1_migration_passes_validation() {
        let raw = yaml(
            r"
version: 1
provider: onprem
global:
  clusterName: Demo-Cluster_01
  clusterDomain: example.com
onprem:
  ip: 10.0.0.5
enabled: [eim, ui, bogus]
",
        );
        let config = migrate(1, raw, &manifest()).unwrap();

        assert_eq!(config.version, CURRENT_VERSION);
        assert_eq!(config.global.orch_name, "democluster01");
        assert_eq!(config.global.parent_domain, "example.com");
        assert_eq!(config.global.admin_email, "admin@example.com");
        assert_eq!(config.onprem.traefik_ip, "10.0.0.5");
        let enabled: Vec<_> = config.orch.enabled.iter().map(String::as_str).collect();
        assert_eq!(enabled, vec!["eim", "fps", "onboarding", "ui"]);
        assert_eq!(config.orch.default_password, DEFAULT_ORCH_PASSWORD);
        validate::validate(&config, &manifest()).unwrap();
    }

    #[test]
    fn test_v1_defaults_when_fields_missing() {
        let raw = yaml("version: 1\nprovider: aws\naws:\n  region: us-west-2\n  account: '123'\n");
        let config = migrate(1, raw, &manifest()).unwrap();
        assert_eq!(config.provider, Provider::Aws);
        assert_eq!(config.global.orch_name, "orch");
        assert_eq!(config.global.parent_domain, "cluster.onprem");
        assert_eq!(config.aws.region, "us-west-2");
        validate::validate(&config, &manifest()).unwrap();
    }

    #[test]
    fn test_v1_adversarial_documents_still_validate() {
        let m = manifest();
        let cases = [
            "version: 1\nenabled: [ui]\n",
            "version: 1\nglobal:\n  clusterDomain: localhost\nonprem:\n  ip: 10.0.0.5\n",
            "version: 1\nonprem:\n  ip: 300.1.2.3\nenabled: [ui, bogus]\n",
            "version: 1\nprovider: aws\naws:\n  region: Mars\nglobal:\n  clusterName: '---'\n",
            "version: 1\nglobal:\n  clusterDomain: Bad_Domain.Example.com\n",
            "version: 1\nglobal:\n  clusterDomain: edge.123\nonprem:\n  ip: 10.0.0.5\n",
        ];
        for doc in cases {
            let config = migrate(1, yaml(doc), &m).unwrap();
            if let Err(e) = validate::validate(&config, &m) {
                panic!("{doc:?} migrated to an invalid document: {e}");
            }
        }
    }

    #[test]
    fn test_v1_ui_without_manager_is_dropped() {
        let config = migrate(1, yaml("version: 1\nonprem:\n  ip: 10.0.0.5\nenabled: [ui]\n"), &manifest()).unwrap();
        let enabled: Vec<_> = config.orch.enabled.iter().map(String::as_str).collect();
        assert_eq!(enabled, vec!["fps"]);
    }

    #[test]
    fn test_v1_fallbacks_for_missing_ip_and_bad_domain() {
        let config = migrate(1, yaml("version: 1\nglobal:\n  clusterDomain: localhost\n"), &manifest()).unwrap();
        assert_eq!(config.global.parent_domain, V1_FALLBACK_DOMAIN);
        assert_eq!(config.global.admin_email, format!("admin@{V1_FALLBACK_DOMAIN}"));
        assert_eq!(config.onprem.argo_ip, V1_FALLBACK_IP);
        assert_eq!(config.onprem.nginx_ip, V1_FALLBACK_IP);
    }

    #[test]
    fn test_v1_long_name_truncated() {
        let raw = yaml("version: 1\nglobal:\n  clusterName: averyveryverylongclustername\n");
        let config = migrate(1, raw, &manifest()).unwrap();
        assert_eq!(config.global.orch_name.len(), 15);
    }

    #[test]
    fn test_v1_azure_rejected() {
        let raw = yaml("version: 1\nprovider: azure\n");
        let err = migrate(1, raw, &manifest()).unwrap_err();
        assert!(matches!(err, InstallError::ConfigInvalid { ref field, .. } if field == "provider"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = migrate(7, yaml("version: 7"), &manifest()).unwrap_err();
        assert!(matches!(err, InstallError::ConfigVersionUnsupported(7)));
        let err = migrate(0, yaml("version: 0"), &manifest()).unwrap_err();
        assert!(matches!(err, InstallError::ConfigVersionUnsupported(0)));
    }

    #[test]
    fn test_current_version_decodes() {
        let raw = yaml("version: 2\nprovider: onprem\nglobal:\n  orchName: demo\n");
        let config = migrate(2, raw, &manifest()).unwrap();
        assert_eq!(config.global.orch_name, "demo");
    }
}
