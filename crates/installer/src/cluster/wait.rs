//! Bounded polling against the cluster.
//!
//! Every wait has a deadline and observes the run's cancellation token.
//! Transient API errors are logged and polled again; only the deadline or
//! cancellation ends a wait early.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ClusterApi, JobState};
use crate::error::{InstallError, Result};

/// Default upper bound for namespace and pod waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound for the repository push job.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(300);
pub const NAMESPACE_POLL: Duration = Duration::from_secs(5);
pub const POD_POLL: Duration = Duration::from_secs(10);

/// Poll interval and deadline for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll: Duration,
    pub timeout: Duration,
}

impl WaitOptions {
    #[must_use]
    pub const fn new(poll: Duration, timeout: Duration) -> Self {
        Self { poll, timeout }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Done(T),
    Pending(String),
    /// Stop waiting with this error.
    Fatal(String),
}

/// Sleep for `duration` unless cancelled first.
///
/// # Errors
///
/// Returns [`InstallError::PipelineAborted`] when `cancel` fires.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(InstallError::PipelineAborted),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `probe` every `opts.poll` until it reports done, fails, or the
/// deadline passes.
///
/// Probe errors are treated as pending. `on_fatal` maps a fatal probe into
/// the error returned to the caller.
///
/// # Errors
///
/// [`InstallError::ClusterWaitTimeout`] on deadline,
/// [`InstallError::PipelineAborted`] on cancellation, or whatever
/// `on_fatal` builds.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    opts: WaitOptions,
    cancel: &CancellationToken,
    on_fatal: impl Fn(String) -> InstallError,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Probe<T>>>,
{
    let start = Instant::now();
    info!(what = %what, timeout_secs = opts.timeout.as_secs(), "Waiting");

    loop {
        if cancel.is_cancelled() {
            return Err(InstallError::PipelineAborted);
        }

        match probe().await {
            Ok(Probe::Done(value)) => {
                info!(what = %what, elapsed_secs = start.elapsed().as_secs(), "Wait complete");
                return Ok(value);
            }
            Ok(Probe::Pending(status)) => debug!(what = %what, status = %status, "Still waiting"),
            Ok(Probe::Fatal(message)) => return Err(on_fatal(message)),
            Err(e) => warn!(what = %what, error = %format!("{e:#}"), "Probe failed, retrying"),
        }

        if start.elapsed() >= opts.timeout {
            return Err(InstallError::ClusterWaitTimeout {
                what: what.to_string(),
                timeout_secs: opts.timeout.as_secs(),
            });
        }

        sleep_or_cancel(opts.poll, cancel).await?;
    }
}

/// Wait for `namespace` to exist with phase `Active`.
///
/// # Errors
///
/// See [`poll_until`].
pub async fn wait_for_namespace(
    api: &dyn ClusterApi,
    namespace: &str,
    opts: WaitOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    poll_until(
        &format!("namespace {namespace}"),
        opts,
        cancel,
        InstallError::ClusterBootstrap,
        || async move {
            Ok(match api.namespace_phase(namespace).await? {
                Some(phase) if phase == "Active" => Probe::Done(()),
                Some(phase) => Probe::Pending(phase),
                None => Probe::Pending("not found".to_string()),
            })
        },
    )
    .await
}

/// Wait for every pod in `namespace` not owned by a Job to be Ready.
///
/// # Errors
///
/// See [`poll_until`].
pub async fn wait_for_pods_ready(
    api: &dyn ClusterApi,
    namespace: &str,
    opts: WaitOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    poll_until(
        &format!("pods in {namespace}"),
        opts,
        cancel,
        InstallError::ClusterBootstrap,
        || async move {
            let readiness = api.pod_readiness(namespace).await?;
            Ok(if readiness.all_ready() {
                Probe::Done(())
            } else {
                Probe::Pending(format!("{}/{} ready", readiness.ready, readiness.total))
            })
        },
    )
    .await
}

/// Wait for a Job to complete. A failed Job ends the wait immediately.
///
/// # Errors
///
/// [`InstallError::GitPushFailed`] when the Job fails, otherwise see
/// [`poll_until`].
pub async fn wait_for_job(
    api: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    opts: WaitOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    poll_until(
        &format!("job {namespace}/{name}"),
        opts,
        cancel,
        InstallError::GitPushFailed,
        || async move {
            Ok(match api.job_state(namespace, name).await? {
                JobState::Complete => Probe::Done(()),
                JobState::Failed(reason) => Probe::Fatal(format!("job {name} failed: {reason}")),
                JobState::Running => Probe::Pending("running".to_string()),
                JobState::Missing => Probe::Pending("not found".to_string()),
            })
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeCluster;
    use super::super::PodReadiness;
    use super::*;
    use k8s_openapi::api::batch::v1::Job;
    use kube::api::ObjectMeta;

    fn fast() -> WaitOptions {
        WaitOptions::new(Duration::from_millis(5), Duration::from_millis(60))
    }

    #[tokio::test]
    async fn test_namespace_wait_returns_when_active() {
        let cluster = FakeCluster::default();
        cluster.add_active_namespace("gitea");
        let cancel = CancellationToken::new();
        wait_for_namespace(&cluster, "gitea", fast(), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespace_wait_times_out() {
        let cluster = FakeCluster::default();
        let cancel = CancellationToken::new();
        let err = wait_for_namespace(&cluster, "argocd", fast(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::ClusterWaitTimeout { .. }));
        assert!(err.to_string().contains("namespace argocd"));
    }

    #[tokio::test]
    async fn test_pods_wait_requires_all_ready() {
        let cluster = FakeCluster::default();
        cluster
            .pods
            .lock()
            .unwrap()
            .insert("gitea".into(), PodReadiness { ready: 1, total: 2 });
        let cancel = CancellationToken::new();
        let err = wait_for_pods_ready(&cluster, "gitea", fast(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::ClusterWaitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_wait_aborts() {
        let cluster = FakeCluster::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = WaitOptions::new(Duration::from_secs(5), Duration::from_secs(600));
        let err = wait_for_namespace(&cluster, "gitea", opts, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::PipelineAborted));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let err = sleep_or_cancel(Duration::from_secs(30), &cancel).await.unwrap_err();
        assert!(matches!(err, InstallError::PipelineAborted));
    }

    #[tokio::test]
    async fn test_failed_job_fails_fast() {
        let cluster = FakeCluster::default();
        let job = Job {
            metadata: ObjectMeta {
                name: Some("gitea-init-demo".into()),
                namespace: Some("gitea".into()),
                ..ObjectMeta::default()
            },
            ..Job::default()
        };
        cluster.create_job(&job).await.unwrap();
        *cluster.job_outcome.lock().unwrap() = Some(JobState::Failed("BackoffLimitExceeded".into()));

        let cancel = CancellationToken::new();
        let opts = WaitOptions::new(Duration::from_millis(5), Duration::from_secs(30));
        let err = wait_for_job(&cluster, "gitea", "gitea-init-demo", opts, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::GitPushFailed(ref m) if m.contains("BackoffLimitExceeded")));
    }
}
