// 12.0 scheduler.rs: the recurring driver. one timer fires cycles for the
// whole roster; actors run concurrently within a tick (the ledger serializes
// per actor, the orchestrator guards against same-actor overlap). shutdown
// is an explicit signal checked between cycles, so stopping is deterministic
// rather than a killed background loop.

use crate::orchestrator::{CycleOrchestrator, CycleOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Handle used to stop a running scheduler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, rx)
}

pub struct Scheduler {
    orchestrator: Arc<CycleOrchestrator>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<CycleOrchestrator>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            orchestrator,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.orchestrator.config().cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_roster().await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }

    async fn run_roster(&self) {
        let mut cycles = JoinSet::new();
        for actor in self.orchestrator.config().actors.clone() {
            let orchestrator = self.orchestrator.clone();
            cycles.spawn(async move {
                let outcome = orchestrator.run_cycle(&actor).await;
                (actor, outcome)
            });
        }

        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok((actor, Ok(CycleOutcome::Completed(_)))) => {
                    tracing::debug!(%actor, "cycle finished");
                }
                Ok((actor, Ok(CycleOutcome::Overlapped))) => {
                    tracing::warn!(%actor, "tick overlapped a running cycle");
                }
                Ok((actor, Err(err))) => {
                    // Abandoned for this actor, retried on the next tick.
                    tracing::warn!(%actor, %err, "cycle abandoned");
                }
                Err(join_err) => {
                    tracing::error!(%join_err, "cycle task panicked");
                }
            }
        }
    }
}
