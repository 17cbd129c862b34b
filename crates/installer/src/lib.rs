//! On-premise Edge Orchestrator installer.
//!
//! Drives a single host from bare OS to a running orchestrator in five
//! phases: host preparation, artifact staging, configuration, cluster
//! bootstrap and GitOps handoff. External effects go through capability
//! traits ([`process::CommandRunner`], [`stager::Registry`],
//! [`cluster::ClusterApi`], [`wizard::Prompter`]) so the pipeline can run
//! against fakes.
//!
//! # Example
//!
//! ```ignore
//! use orch_installer::commands::install::InstallCommand;
//!
//! let outcome = command.run(CancellationToken::new()).await?;
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod gitops;
pub mod host;
pub mod orchestrator;
pub mod process;
pub mod secrets;
pub mod stager;
pub mod state;
pub mod ui;
pub mod wizard;

// Re-export commonly used types at the crate root
pub use config::{Config, InstallSettings, PackageManifest};
pub use error::InstallError;
pub use orchestrator::{Installer, Outcome, PhaseError};
pub use state::Phase;
