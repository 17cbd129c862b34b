//! Installer error kinds.
//!
//! Every fatal condition the pipeline can hit maps onto exactly one variant.
//! Phases return these at their boundary so the orchestrator can name the
//! failing phase and the immediate cause.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the installer pipeline.
#[derive(Error, Debug)]
pub enum InstallError {
    /// A configuration field failed validation.
    #[error("invalid configuration: {field} = {value:?}: {rule}")]
    ConfigInvalid {
        /// Dotted field path, e.g. `global.orchName`.
        field: String,
        /// Offending value (secrets are redacted by the caller).
        value: String,
        /// Human-readable rule that was violated.
        rule: String,
    },

    /// The config document carries a schema version we cannot migrate.
    #[error("unsupported config version {0}")]
    ConfigVersionUnsupported(u32),

    /// Host preparation failed; the cluster has not been touched.
    #[error("host preparation failed: {0}")]
    HostPrep(String),

    /// The artifact registry could not be reached after all retries.
    #[error("registry unreachable for {reference} after {attempts} attempts: {message}")]
    RegistryUnreachable {
        reference: String,
        attempts: u32,
        message: String,
    },

    /// The registry rejected the pull for lack of credentials.
    #[error("registry requires authentication for {0}")]
    AuthenticationRequired(String),

    /// The registry reported a digest mismatch.
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// A staged artifact could not be found locally.
    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    /// Local file-system failure.
    #[error("I/O error at {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Installing or talking to the local Kubernetes distribution failed.
    #[error("cluster bootstrap failed: {0}")]
    ClusterBootstrap(String),

    /// A cluster wait primitive hit its deadline.
    #[error("timed out after {timeout_secs}s waiting for {what}")]
    ClusterWaitTimeout { what: String, timeout_secs: u64 },

    /// Writing a managed secret failed.
    #[error("failed to write secret {namespace}/{name}: {message}")]
    SecretWriteFailed {
        namespace: String,
        name: String,
        message: String,
    },

    /// Pushing the configuration repository to the in-cluster Git failed.
    #[error("git push failed: {0}")]
    GitPushFailed(String),

    /// Installing the root GitOps application failed.
    #[error("root application install failed: {0}")]
    RootAppInstallFailed(String),

    /// The run was interrupted.
    #[error("pipeline aborted")]
    PipelineAborted,
}

impl InstallError {
    /// Build a [`InstallError::ConfigInvalid`].
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            value: value.into(),
            rule: rule.into(),
        }
    }

    /// Build a [`InstallError::LocalIo`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the installer.
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
