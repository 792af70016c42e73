//! Agent refresh: re-fetch profiles for authors discovered by the sync
//! jobs and for agents whose stored profile has gone stale.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use moltbook_client::ClientError;
use sentinel_common::Agent;

use crate::scheduler::Shutdown;
use crate::traits::{ContentStore, FeedApi};

#[derive(Debug, Default)]
pub struct AgentRefreshStats {
    pub requested: usize,
    pub refreshed: usize,
    pub missing: usize,
    pub malformed: usize,
    pub failures: usize,
}

impl fmt::Display for AgentRefreshStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested: {} refreshed, {} missing, {} malformed, {} failures",
            self.requested, self.refreshed, self.missing, self.malformed, self.failures,
        )
    }
}

pub struct AgentRefresh<A, S> {
    api: Arc<A>,
    store: Arc<S>,
    stale_hours: i64,
    cap: i64,
    authors_rx: Arc<Mutex<mpsc::Receiver<BTreeSet<String>>>>,
    shutdown: Option<Shutdown>,
}

impl<A: FeedApi, S: ContentStore> AgentRefresh<A, S> {
    pub fn new(
        api: Arc<A>,
        store: Arc<S>,
        stale_hours: i64,
        cap: i64,
        authors_rx: Arc<Mutex<mpsc::Receiver<BTreeSet<String>>>>,
    ) -> Self {
        Self {
            api,
            store,
            stale_hours,
            cap,
            authors_rx,
            shutdown: None,
        }
    }

    /// Stop between profiles once shutdown is triggered.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// One refresh pass: names handed off by the sync jobs plus stored
    /// agents past the staleness threshold, capped per run. A missing
    /// profile is recorded and skipped, never fatal.
    pub async fn run(&self) -> anyhow::Result<AgentRefreshStats> {
        let mut stats = AgentRefreshStats::default();

        let mut names = self.drain_handoff().await;
        let stale_before = Utc::now() - Duration::hours(self.stale_hours);
        let stale = self
            .store
            .refresh_candidates(stale_before, self.cap)
            .await
            .context("failed to load stale agents")?;
        names.extend(stale);

        for name in names.into_iter().take(self.cap as usize) {
            if self.shutdown.as_ref().is_some_and(Shutdown::is_cancelled) {
                info!("Shutdown requested, ending refresh early");
                break;
            }
            stats.requested += 1;
            match self.refresh_one(&name).await {
                Ok(Refreshed::Updated) => stats.refreshed += 1,
                Ok(Refreshed::Missing) => stats.missing += 1,
                Ok(Refreshed::Malformed) => stats.malformed += 1,
                Err(e) => {
                    stats.failures += 1;
                    warn!(agent = %name, error = %e, "Agent refresh failed, continuing");
                }
            }
        }

        info!(%stats, "Agent refresh complete");
        Ok(stats)
    }

    async fn refresh_one(&self, name: &str) -> anyhow::Result<Refreshed> {
        let profile = match self.api.agent_profile(name).await {
            Ok(profile) => profile,
            Err(ClientError::NotFound(_)) => {
                debug!(agent = %name, "Agent no longer exists remotely");
                return Ok(Refreshed::Missing);
            }
            Err(e) => return Err(e).context("agent profile fetch failed"),
        };

        let Some(agent) = Agent::from_profile(&profile) else {
            warn!(agent = %name, "Agent profile payload has no name, skipping");
            return Ok(Refreshed::Malformed);
        };

        self.store.upsert_agent(&agent).await?;
        Ok(Refreshed::Updated)
    }

    async fn drain_handoff(&self) -> BTreeSet<String> {
        let mut rx = self.authors_rx.lock().await;
        let mut names = BTreeSet::new();
        while let Ok(batch) = rx.try_recv() {
            names.extend(batch);
        }
        names
    }
}

enum Refreshed {
    Updated,
    Missing,
    Malformed,
}
