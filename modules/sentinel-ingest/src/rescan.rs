//! Stale comment rescan: re-walk the full comment tree of every post that
//! appeared in a recent feed snapshot, repairing edits, vote drift, and
//! late replies the incremental guard will never revisit.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::scheduler::Shutdown;
use crate::traits::{ContentStore, FeedApi};
use crate::trending::{send_authors, sync_post_detail};

#[derive(Debug, Default)]
pub struct RescanStats {
    pub candidates: usize,
    pub rescanned: usize,
    pub missing: usize,
    pub comments_synced: usize,
    pub failures: usize,
}

impl fmt::Display for RescanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates: {} rescanned, {} comments, {} missing, {} failures",
            self.candidates, self.rescanned, self.comments_synced, self.missing, self.failures,
        )
    }
}

pub struct StaleRescan<A, S> {
    api: Arc<A>,
    store: Arc<S>,
    window_days: i64,
    authors_tx: mpsc::Sender<BTreeSet<String>>,
    shutdown: Option<Shutdown>,
}

impl<A: FeedApi, S: ContentStore> StaleRescan<A, S> {
    pub fn new(
        api: Arc<A>,
        store: Arc<S>,
        window_days: i64,
        authors_tx: mpsc::Sender<BTreeSet<String>>,
    ) -> Self {
        Self {
            api,
            store,
            window_days,
            authors_tx,
            shutdown: None,
        }
    }

    /// Stop between posts once shutdown is triggered.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// One rescan pass over every post seen in a snapshot inside the
    /// trailing window. The freshness guard is deliberately bypassed; this
    /// job exists to catch what the guard hides.
    pub async fn run(&self) -> anyhow::Result<RescanStats> {
        let mut stats = RescanStats::default();
        let since = Utc::now() - Duration::days(self.window_days);

        let post_ids = self
            .store
            .trending_post_ids(since)
            .await
            .context("failed to load rescan candidates")?;
        stats.candidates = post_ids.len();

        let mut authors: BTreeSet<String> = BTreeSet::new();
        for post_id in &post_ids {
            if self.shutdown.as_ref().is_some_and(Shutdown::is_cancelled) {
                info!("Shutdown requested, ending rescan early");
                break;
            }
            let cursor = match self
                .store
                .get_cursor(&sentinel_common::IngestCursor::comments_source(post_id))
                .await
            {
                Ok(cursor) => cursor,
                Err(e) => {
                    stats.failures += 1;
                    warn!(post_id = %post_id, error = %e, "Cursor read failed, continuing");
                    continue;
                }
            };

            match sync_post_detail(
                self.api.as_ref(),
                self.store.as_ref(),
                post_id,
                cursor.as_ref(),
                true,
                &mut authors,
            )
            .await
            {
                Ok(Some(comments)) => {
                    stats.rescanned += 1;
                    stats.comments_synced += comments;
                }
                Ok(None) => stats.missing += 1,
                Err(e) => {
                    stats.failures += 1;
                    warn!(post_id = %post_id, error = %e, "Rescan failed, continuing");
                }
            }
        }

        send_authors(&self.authors_tx, authors);

        info!(window_days = self.window_days, %stats, "Stale rescan complete");
        Ok(stats)
    }
}
