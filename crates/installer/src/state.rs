//! Pipeline phases and retry policy.
//!
//! The installation plan is recomputed on every run and never persisted:
//! re-running the installer walks the same phases again and converges because
//! every cluster write is an upsert.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Top-level installer phases, executed strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not yet started.
    NotStarted,
    /// Kernel modules, sysctl, hostpath directories, tool chain.
    HostPreparation,
    /// Pull installer bundles and repository archives.
    ArtifactStaging,
    /// Load, migrate, elicit, validate, save the config document.
    Configuration,
    /// Install the distribution, GitOps controller, namespaces, secrets.
    ClusterBootstrap,
    /// Materialize the repo, push it to Gitea, install the root app.
    GitOpsHandoff,
    /// All phases finished.
    Complete,
}

impl Phase {
    /// Get the next phase in the sequence.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::NotStarted => Self::HostPreparation,
            Self::HostPreparation => Self::ArtifactStaging,
            Self::ArtifactStaging => Self::Configuration,
            Self::Configuration => Self::ClusterBootstrap,
            Self::ClusterBootstrap => Self::GitOpsHandoff,
            Self::GitOpsHandoff | Self::Complete => Self::Complete,
        }
    }

    /// Get a human-readable description of the phase.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::HostPreparation => "Preparing host",
            Self::ArtifactStaging => "Staging artifacts",
            Self::Configuration => "Configuring orchestrator",
            Self::ClusterBootstrap => "Bootstrapping cluster and secrets",
            Self::GitOpsHandoff => "Handing off to GitOps",
            Self::Complete => "Complete",
        }
    }

    /// Get the phase number for progress display.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::HostPreparation => 1,
            Self::ArtifactStaging => 2,
            Self::Configuration => 3,
            Self::ClusterBootstrap => 4,
            Self::GitOpsHandoff => 5,
            Self::Complete => 6,
        }
    }

    /// Whether this phase may mutate the cluster.
    #[must_use]
    pub fn touches_cluster(self) -> bool {
        matches!(self, Self::ClusterBootstrap | Self::GitOpsHandoff)
    }

    /// Number of working phases.
    pub const TOTAL_STEPS: u8 = 5;
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Progress of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Current phase.
    pub phase: Phase,
    /// Phases that completed during this run, in order.
    pub completed: Vec<Phase>,
    /// Last error message (if any).
    pub last_error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            completed: Vec::new(),
            last_error: None,
        }
    }

    /// Mark the current phase done and move to the next one.
    pub fn advance(&mut self) {
        let next = self.phase.next();
        info!("Phase: {} -> {}", self.phase, next);
        if self.phase != Phase::NotStarted {
            self.completed.push(self.phase);
        }
        self.phase = next;
        self.last_error = None;
    }

    /// Record an error for the current phase.
    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}

/// Retry configuration for operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier. `1.0` gives a fixed delay.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::registry()
    }
}

impl RetryConfig {
    /// Registry pulls: 10 attempts, fixed 15 second delay.
    #[must_use]
    pub fn registry() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 1.0,
        }
    }

    /// Retry immediately; used by tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the delay for a given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(10)).unwrap_or(10);
        let multiplier = self.backoff_multiplier.powi(exp);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry given the number of attempts made so far.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
