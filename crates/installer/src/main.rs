//! Edge Orchestrator on-premise installer CLI.
//!
//! Prepares this host, stages release artifacts, collects the deployment
//! configuration, bootstraps the cluster and hands off to GitOps.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use orch_installer::commands::install::InstallCommand;
use orch_installer::{ui, PhaseError};

/// Edge Orchestrator on-premise installer.
#[derive(Parser)]
#[command(
    name = "onprem-installer",
    version,
    about = "Install the Edge Orchestrator on an on-premise host",
    long_about = "Install the Edge Orchestrator on an on-premise host.\n\n\
                  Prepares the host, downloads the release artifacts, collects the\n\
                  configuration, bootstraps Kubernetes and hands the deployment\n\
                  over to Argo CD."
)]
struct Cli {
    #[command(flatten)]
    install: InstallCommand,
}

fn log_filter(trace: bool) -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    if trace {
        EnvFilter::new("info,orch_installer=debug,kube=info")
    } else {
        EnvFilter::new("warn,orch_installer=info")
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = i32::from(err.use_stderr());
            // Help and version go to stdout and exit 0
            let _ = err.print();
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.install.trace))
        .with_target(false)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    if let Err(e) = cli.install.run(cancel).await {
        // PhaseError already renders its cause
        let message = if e.downcast_ref::<PhaseError>().is_some() {
            format!("{e}")
        } else {
            format!("{e:#}")
        };
        ui::print_error(&message);
        std::process::exit(1);
    }
}
