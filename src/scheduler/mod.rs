//! Scheduler: runs named periodic ticks and long-lived workers until shutdown.
//!
//! Each periodic task gets its own interval loop. A tick awaits its handler
//! before the next one is considered, missed ticks are skipped rather than
//! bunched, and a per-task guard rejects any overlapping run (e.g. a manual
//! `run_once` racing the interval).

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A handler driven on a fixed period.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self);
}

/// Held while a handler runs; released on drop.
pub struct TickPermit<'a> {
    busy: &'a AtomicBool,
}

impl Drop for TickPermit<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Re-entrancy guard for one handler.
#[derive(Default)]
pub struct TickGuard {
    busy: AtomicBool,
}

impl TickGuard {
    pub fn try_enter(&self) -> Option<TickPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit { busy: &self.busy })
    }
}

/// A periodic task paired with its guard.
pub struct GuardedTask {
    task: Arc<dyn PeriodicTask>,
    guard: TickGuard,
}

impl GuardedTask {
    pub fn new(task: Arc<dyn PeriodicTask>) -> Self {
        Self {
            task,
            guard: TickGuard::default(),
        }
    }

    /// Run the handler unless a previous run is still in flight.
    /// Returns false when the run was skipped.
    pub async fn run_once(&self) -> bool {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Scheduler: {} still running, skipping tick", self.task.name());
            return false;
        };
        self.task.run().await;
        true
    }
}

pub struct Scheduler {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Run `task` every `period`. The first run happens one period after start.
    pub fn every(&mut self, period: Duration, task: Arc<dyn PeriodicTask>) {
        let cancel = self.cancel.clone();
        let guarded = GuardedTask::new(task);
        self.tasks.spawn(async move {
            let name = guarded.task.name();
            info!("Scheduler: {} every {:?}", name, period);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        guarded.run_once().await;
                    }
                }
            }
            info!("Scheduler: {} stopped", name);
        });
    }

    /// Run a long-lived worker that watches the cancellation token itself.
    pub fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            worker.await;
            debug!("Scheduler: worker {} finished", name);
        });
    }

    /// Wait until cancelled, then for every task to wind down.
    pub async fn run(mut self) {
        self.cancel.cancelled().await;
        info!("Scheduler: shutdown requested, waiting for {} tasks", self.tasks.len());
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!("Scheduler: task ended abnormally: {}", e);
            }
        }
        info!("Scheduler: all tasks stopped");
    }
}
