//! Periodic job driver. Each job owns a slot; a timer tick that fires while
//! the previous run is still active is dropped, never queued, so a slow API
//! day cannot pile up concurrent runs against the shared rate budget.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::agents::AgentRefresh;
use crate::rescan::StaleRescan;
use crate::traits::{ContentStore, FeedApi};
use crate::trending::TrendingSync;

/// Cooperative shutdown signal, cloneable into every loop.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered (or the handle is dropped).
    pub async fn wait(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Single-occupancy marker for one job. `try_begin` claims the slot;
/// `finish` releases it.
pub struct JobSlot {
    name: &'static str,
    running: AtomicBool,
}

impl JobSlot {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            running: AtomicBool::new(false),
        })
    }

    pub fn try_begin(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Drive one job on a fixed period until shutdown. The first tick fires
/// immediately. Runs execute as spawned tasks so a long run never blocks
/// the tick stream; overlapping ticks are dropped via the slot.
pub async fn job_loop<F, Fut>(
    period: Duration,
    slot: Arc<JobSlot>,
    mut shutdown: Shutdown,
    run: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !slot.try_begin() {
                    debug!(job = slot.name, "Previous run still active, dropping trigger");
                    continue;
                }
                let slot = slot.clone();
                let fut = run();
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        error!(job = slot.name, error = format!("{e:#}"), "Job run failed");
                    }
                    slot.finish();
                });
            }
            _ = shutdown.wait() => break,
        }
    }

    debug!(job = slot.name, "Job loop stopped");
}

pub struct Scheduler<A, S> {
    trending: Arc<TrendingSync<A, S>>,
    agents: Arc<AgentRefresh<A, S>>,
    rescan: Arc<StaleRescan<A, S>>,
    trending_period: Duration,
    agents_period: Duration,
    rescan_period: Duration,
}

impl<A, S> Scheduler<A, S>
where
    A: FeedApi + 'static,
    S: ContentStore + 'static,
{
    pub fn new(
        trending: Arc<TrendingSync<A, S>>,
        agents: Arc<AgentRefresh<A, S>>,
        rescan: Arc<StaleRescan<A, S>>,
        trending_period: Duration,
        agents_period: Duration,
        rescan_period: Duration,
    ) -> Self {
        Self {
            trending,
            agents,
            rescan,
            trending_period,
            agents_period,
            rescan_period,
        }
    }

    /// Run all three job loops until shutdown, then wait for in-flight runs
    /// to finish (bounded grace period).
    pub async fn run(self, shutdown: Shutdown) {
        let slots = [
            JobSlot::new("trending_sync"),
            JobSlot::new("agent_refresh"),
            JobSlot::new("stale_rescan"),
        ];

        let mut loops = JoinSet::new();

        let trending = self.trending.clone();
        loops.spawn(job_loop(
            self.trending_period,
            slots[0].clone(),
            shutdown.clone(),
            move || {
                let job = trending.clone();
                async move { job.run().await.map(drop) }
            },
        ));

        let agents = self.agents.clone();
        loops.spawn(job_loop(
            self.agents_period,
            slots[1].clone(),
            shutdown.clone(),
            move || {
                let job = agents.clone();
                async move { job.run().await.map(drop) }
            },
        ));

        let rescan = self.rescan.clone();
        loops.spawn(job_loop(
            self.rescan_period,
            slots[2].clone(),
            shutdown.clone(),
            move || {
                let job = rescan.clone();
                async move { job.run().await.map(drop) }
            },
        ));

        while loops.join_next().await.is_some() {}

        let grace = Duration::from_secs(30);
        let drained = tokio::time::timeout(grace, async {
            while slots.iter().any(|s| s.is_running()) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if drained.is_err() {
            error!("In-flight job runs did not finish within the grace period");
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_dropped_not_queued() {
        let started = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let slot = JobSlot::new("test_job");
        let (handle, shutdown) = shutdown_pair();

        let run = {
            let started = started.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            move || {
                let started = started.clone();
                let concurrent = concurrent.clone();
                let max_concurrent = max_concurrent.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    // Each run spans two and a half tick periods.
                    tokio::time::sleep(Duration::from_secs(25)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };

        let driver = tokio::spawn(job_loop(
            Duration::from_secs(10),
            slot.clone(),
            shutdown,
            run,
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.trigger();
        driver.await.unwrap();

        // Seven ticks fit in the window but runs take 25s each, so at most
        // three can start and none may overlap.
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
        let started = started.load(Ordering::SeqCst);
        assert!((2..=3).contains(&started), "started {started} runs");
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_after_trigger() {
        let (handle, mut shutdown) = shutdown_pair();
        assert!(!shutdown.is_cancelled());
        handle.trigger();
        shutdown.wait().await;
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn slot_is_single_occupancy() {
        let slot = JobSlot::new("s");
        assert!(slot.try_begin());
        assert!(!slot.try_begin());
        slot.finish();
        assert!(slot.try_begin());
    }
}
