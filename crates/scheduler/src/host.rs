//! Process-level host for several independent scheduler loops.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::scheduler::{LoopStats, SchedulerHandle, SchedulerLoop, SchedulerState};

/// Outcome of [`SchedulerHost::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostShutdown {
    /// Loops that drained within the timeout, with their final counters.
    pub stopped: Vec<(String, LoopStats)>,
    /// Loops still draining when the timeout expired.
    pub timed_out: Vec<String>,
}

impl HostShutdown {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Owns the process-wide cancellation signal and the handles of its loops.
#[derive(Debug, Default)]
pub struct SchedulerHost {
    cancel: CancellationToken,
    loops: Vec<SchedulerHandle>,
}

impl SchedulerHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host driven by an existing cancellation token.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            loops: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start `scheduler` under this host's cancellation signal.
    pub fn spawn(&mut self, scheduler: SchedulerLoop) {
        info!(scheduler = %scheduler.name(), "starting scheduler loop");
        let handle = scheduler.start(self.cancel.clone());
        self.loops.push(handle);
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn states(&self) -> Vec<(String, SchedulerState)> {
        self.loops
            .iter()
            .map(|h| (h.name().to_string(), h.state()))
            .collect()
    }

    pub fn stats(&self) -> Vec<(String, LoopStats)> {
        self.loops
            .iter()
            .map(|h| (h.name().to_string(), h.stats()))
            .collect()
    }

    /// Cancel every loop and wait up to `timeout` for all of them to drain.
    pub async fn shutdown(self, timeout: Duration) -> HostShutdown {
        info!(loops = self.loops.len(), timeout_secs = timeout.as_secs(), "shutting down scheduler loops");
        self.cancel.cancel();

        let deadline = Instant::now() + timeout;
        let joined = join_all(self.loops.into_iter().map(|handle| async move {
            let name = handle.name().to_string();
            match tokio::time::timeout_at(deadline, handle.join()).await {
                Ok(stats) => Ok((name, stats)),
                Err(_) => Err(name),
            }
        }))
        .await;

        let mut summary = HostShutdown::default();
        for result in joined {
            match result {
                Ok(stopped) => summary.stopped.push(stopped),
                Err(name) => {
                    warn!(scheduler = %name, "scheduler loop did not stop before the shutdown timeout");
                    summary.timed_out.push(name);
                }
            }
        }
        info!(
            stopped = summary.stopped.len(),
            timed_out = summary.timed_out.len(),
            "scheduler loops shut down"
        );
        summary
    }

    /// Wait for Ctrl+C or SIGTERM.
    pub async fn wait_for_signal() -> std::io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                res = ctrl_c => {
                    res?;
                    info!("received Ctrl+C");
                }
                _ = terminate.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await?;
            info!("received Ctrl+C");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use shopworks_core::TenantId;

    use crate::task::{TaskDefinition, directory_fn, unit_fn};

    const MIN: Duration = Duration::from_secs(60);

    fn scheduler(name: &str, work: Duration) -> SchedulerLoop {
        SchedulerLoop::builder(name)
            .sink(crate::sink::InMemoryReportSink::new())
            .register(TaskDefinition::new(
                format!("{name}.task"),
                MIN,
                directory_fn(|_ctx| async { Ok(vec![TenantId::parse("shop-a").unwrap()]) }),
                unit_fn(move |_tenant, _cancel| async move {
                    tokio::time::sleep(work).await;
                    Ok(())
                }),
            ))
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let mut host = SchedulerHost::new();
        host.spawn(scheduler("analytics", Duration::ZERO));
        host.spawn(scheduler("marketing", Duration::ZERO));
        assert_eq!(host.len(), 2);

        tokio::time::sleep(MIN * 2 + Duration::from_secs(1)).await;
        let summary = host.shutdown(Duration::from_secs(30)).await;

        assert!(summary.is_clean());
        assert_eq!(summary.stopped.len(), 2);
        for (_, stats) in &summary.stopped {
            assert_eq!(stats.cycles, 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_loops_that_overrun_the_timeout() {
        let mut host = SchedulerHost::new();
        host.spawn(scheduler("fast", Duration::ZERO));
        host.spawn(scheduler("stuck", Duration::from_secs(3600)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let summary = host.shutdown(Duration::from_secs(5)).await;

        assert_eq!(summary.timed_out, vec!["stuck".to_string()]);
        assert_eq!(summary.stopped.len(), 1);
        assert_eq!(summary.stopped[0].0, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn external_token_stops_hosted_loops() {
        let token = CancellationToken::new();
        let mut host = SchedulerHost::with_token(token.clone());
        host.spawn(scheduler("a", Duration::ZERO));

        token.cancel();
        let summary = host.shutdown(Duration::from_secs(1)).await;
        assert!(summary.is_clean());
        assert!(summary.stopped[0].0 == "a");
    }
}
