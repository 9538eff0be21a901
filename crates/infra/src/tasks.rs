//! Periodic background tasks (token renewal, refresh beat).

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to stop and join a periodic task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the task to stop.
    ///
    /// A run in progress finishes first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(task = self.name, error = %e, "periodic task panicked");
            }
        }
    }
}

/// Run `run` every `period`, starting immediately.
///
/// Ticks missed while a run is in progress are skipped rather than bunched.
/// Errors are logged and do not stop the loop.
pub fn spawn_periodic<F, Fut, T, E>(name: &'static str, period: Duration, mut run: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: std::fmt::Debug + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_secs = period.as_secs(), "periodic task started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    match run().await {
                        Ok(outcome) => debug!(task = name, ?outcome, "periodic run finished"),
                        Err(e) => warn!(task = name, error = %e, "periodic run failed"),
                    }
                }
            }
        }

        info!(task = name, "periodic task stopped");
    });

    TaskHandle {
        name,
        shutdown: shutdown_tx,
        join: Some(join),
    }
}
