//! Credential materialization.
//!
//! Builds the full set of managed secrets from the config and writes each
//! one as delete-then-create, so the cluster always ends with the value
//! decided by this run.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use tracing::{debug, info};

use crate::cluster::{ClusterApi, SecretSpec};
use crate::config::{Config, PasswordPolicy};
use crate::error::{InstallError, Result};

pub const HARBOR_NAMESPACE: &str = "orch-harbor";
pub const KEYCLOAK_NAMESPACE: &str = "orch-platform";
pub const POSTGRES_NAMESPACE: &str = "orch-database";
pub const SRE_NAMESPACE: &str = "orch-sre";
pub const SMTP_NAMESPACE: &str = "orch-infra";
pub const AZURE_NAMESPACE: &str = "orch-secret";

pub const HARBOR_PASSWORD_LEN: usize = 100;
pub const STRONG_PASSWORD_LEN: usize = 25;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()_+{}|:<>?";

/// Where a secret value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOrigin {
    /// Random value produced by this run, or reused under `preserve`.
    Generated,
    /// Provided by the user through config or environment.
    Supplied,
    /// Computed from another managed value.
    Derived,
}

/// One managed secret and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub spec: SecretSpec,
    pub origin: SecretOrigin,
}

impl SecretRecord {
    fn new(spec: SecretSpec, origin: SecretOrigin) -> Self {
        Self { spec, origin }
    }
}

fn sample<R: Rng>(rng: &mut R, charset: &[u8], n: usize) -> Vec<u8> {
    (0..n)
        .map(|_| charset[rng.gen_range(0..charset.len())])
        .collect()
}

/// 100 alphanumeric characters.
pub fn harbor_password<R: Rng + CryptoRng>(rng: &mut R) -> String {
    let charset = [UPPER, LOWER, DIGITS].concat();
    // ASCII only
    String::from_utf8_lossy(&sample(rng, &charset, HARBOR_PASSWORD_LEN)).into_owned()
}

/// 25 characters with at least one lower, upper, digit and special.
///
/// One character is drawn from each class, the rest from their union, and
/// the result is shuffled.
pub fn strong_password<R: Rng + CryptoRng>(rng: &mut R) -> String {
    let all = [LOWER, UPPER, DIGITS, SPECIAL].concat();

    let mut chars = Vec::with_capacity(STRONG_PASSWORD_LEN);
    for class in [LOWER, UPPER, DIGITS, SPECIAL] {
        chars.extend(sample(rng, class, 1));
    }
    chars.extend(sample(rng, &all, STRONG_PASSWORD_LEN - 4));
    chars.shuffle(rng);

    String::from_utf8_lossy(&chars).into_owned()
}

/// Admin passwords for this run.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminPasswords {
    pub harbor: String,
    pub keycloak: String,
    pub postgres: String,
}

impl std::fmt::Debug for AdminPasswords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminPasswords").finish_non_exhaustive()
    }
}

impl AdminPasswords {
    /// Fresh values from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self {
            harbor: harbor_password(rng),
            keycloak: strong_password(rng),
            postgres: strong_password(rng),
        }
    }

    /// Resolve passwords under `policy`.
    ///
    /// `Regenerate` always returns fresh values. `Preserve` reuses whatever
    /// the cluster already holds and generates only the missing ones.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::SecretWriteFailed`] if an existing secret
    /// cannot be read.
    pub async fn resolve(api: &dyn ClusterApi, policy: PasswordPolicy) -> Result<Self> {
        let mut passwords = Self::generate();
        if policy == PasswordPolicy::Regenerate {
            return Ok(passwords);
        }

        let slots = [
            (&mut passwords.harbor, HARBOR_NAMESPACE, "harbor-admin-password", "HARBOR_ADMIN_PASSWORD"),
            (&mut passwords.keycloak, KEYCLOAK_NAMESPACE, "platform-keycloak", "admin-password"),
            (&mut passwords.postgres, POSTGRES_NAMESPACE, "postgresql", "postgres-password"),
        ];
        for (slot, namespace, name, key) in slots {
            let existing = api
                .read_secret_key(namespace, name, key)
                .await
                .map_err(|e| write_failed(namespace, name, &e))?;
            if let Some(value) = existing.filter(|v| !v.is_empty()) {
                debug!(namespace = %namespace, secret = %name, "Preserving existing password");
                *slot = value;
            }
        }
        Ok(passwords)
    }
}

fn write_failed(namespace: &str, name: &str, err: &anyhow::Error) -> InstallError {
    InstallError::SecretWriteFailed {
        namespace: namespace.to_string(),
        name: name.to_string(),
        message: format!("{err:#}"),
    }
}

/// Every secret the installer manages for `config`, in write order.
///
/// Expects SRE and SMTP values to be filled already.
#[must_use]
pub fn plan(config: &Config, passwords: &AdminPasswords) -> Vec<SecretRecord> {
    use SecretOrigin::{Derived, Generated, Supplied};

    let sre = &config.sre;
    let smtp = &config.smtp;

    let mut records = vec![
        SecretRecord::new(
            SecretSpec::new(SRE_NAMESPACE, "basic-auth-username").with_data("username", &sre.username),
            Supplied,
        ),
        SecretRecord::new(
            SecretSpec::new(SRE_NAMESPACE, "basic-auth-password").with_data("password", &sre.password),
            Supplied,
        ),
        SecretRecord::new(
            SecretSpec::new(SRE_NAMESPACE, "destination-secret-url").with_data("url", &sre.secret_url),
            Supplied,
        ),
    ];

    if !sre.ca_secret.trim().is_empty() {
        let pem = format!("{}\n", sre.ca_secret.trim_end());
        records.push(SecretRecord::new(
            SecretSpec::new(SRE_NAMESPACE, "destination-secret-ca").with_data("ca.crt", pem),
            Supplied,
        ));
    }

    records.extend([
        SecretRecord::new(
            SecretSpec::new(SMTP_NAMESPACE, "smtp")
                .with_type("Opaque")
                .with_data("smartHost", &smtp.url)
                .with_data("smartPort", &smtp.port)
                .with_data("from", &smtp.from)
                .with_data("authUsername", &smtp.username),
            Supplied,
        ),
        SecretRecord::new(
            SecretSpec::new(SMTP_NAMESPACE, "smtp-auth")
                .with_type("kubernetes.io/basic-auth")
                .with_data("password", &smtp.password),
            Supplied,
        ),
    ]);

    let refresh_token = &config.advanced.azure_ad_refresh_token;
    if !refresh_token.is_empty() {
        records.push(SecretRecord::new(
            SecretSpec::new(AZURE_NAMESPACE, "azure-ad-creds").with_data("refresh_token", refresh_token),
            Supplied,
        ));
    }

    records.extend([
        SecretRecord::new(
            SecretSpec::new(HARBOR_NAMESPACE, "harbor-admin-credential")
                .with_data("credential", format!("admin:{}", passwords.harbor)),
            Derived,
        ),
        SecretRecord::new(
            SecretSpec::new(HARBOR_NAMESPACE, "harbor-admin-password")
                .with_data("HARBOR_ADMIN_PASSWORD", &passwords.harbor),
            Generated,
        ),
        SecretRecord::new(
            SecretSpec::new(KEYCLOAK_NAMESPACE, "platform-keycloak")
                .with_data("admin-password", &passwords.keycloak),
            Generated,
        ),
        SecretRecord::new(
            SecretSpec::new(POSTGRES_NAMESPACE, "postgresql")
                .with_data("postgres-password", &passwords.postgres),
            Generated,
        ),
    ]);

    records
}

/// Delete-then-create one secret.
///
/// # Errors
///
/// Returns [`InstallError::SecretWriteFailed`] naming the secret.
pub async fn replace_secret(api: &dyn ClusterApi, spec: &SecretSpec) -> Result<()> {
    api.delete_secret(&spec.namespace, &spec.name)
        .await
        .map_err(|e| write_failed(&spec.namespace, &spec.name, &e))?;
    api.create_secret(spec)
        .await
        .map_err(|e| write_failed(&spec.namespace, &spec.name, &e))?;
    Ok(())
}

/// Write every record in order, stopping at the first failure.
///
/// # Errors
///
/// Returns [`InstallError::SecretWriteFailed`] for the failing secret.
pub async fn write_all(api: &dyn ClusterApi, records: &[SecretRecord]) -> Result<usize> {
    for record in records {
        replace_secret(api, &record.spec).await?;
        debug!(
            namespace = %record.spec.namespace,
            secret = %record.spec.name,
            origin = ?record.origin,
            "Secret written"
        );
    }
    info!(count = records.len(), "Secrets written");
    Ok(records.len())
}
