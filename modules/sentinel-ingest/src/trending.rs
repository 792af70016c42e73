//! Trending sync: harvest the ranked feed, snapshot the ranking, and pull
//! post details plus comment trees for every listed post.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use moltbook_client::{ClientError, FeedEntry};
use sentinel_common::{parse_author_name, parse_timestamp, IngestCursor, Post};
use sentinel_store::{SnapshotRow, StoreError};

use crate::flatten::flatten_comments;
use crate::scheduler::Shutdown;
use crate::traits::{ContentStore, FeedApi};

/// Upper bound on feed pages per run, in case the remote never reports an
/// end of feed.
const MAX_FEED_PAGES: u32 = 20;

#[derive(Debug, Default)]
pub struct TrendingStats {
    pub pages: u32,
    pub feed_entries: usize,
    pub posts_synced: usize,
    pub posts_missing: usize,
    pub comments_synced: usize,
    pub guard_skips: usize,
    pub failures: usize,
    pub authors_discovered: usize,
}

impl fmt::Display for TrendingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries over {} pages: {} posts synced, {} comments, \
             {} guard skips, {} missing, {} failures, {} authors",
            self.feed_entries,
            self.pages,
            self.posts_synced,
            self.comments_synced,
            self.guard_skips,
            self.posts_missing,
            self.failures,
            self.authors_discovered,
        )
    }
}

pub struct TrendingSync<A, S> {
    api: Arc<A>,
    store: Arc<S>,
    feed_type: String,
    feed_limit: u32,
    authors_tx: mpsc::Sender<BTreeSet<String>>,
    shutdown: Option<Shutdown>,
}

impl<A: FeedApi, S: ContentStore> TrendingSync<A, S> {
    pub fn new(
        api: Arc<A>,
        store: Arc<S>,
        feed_type: String,
        feed_limit: u32,
        authors_tx: mpsc::Sender<BTreeSet<String>>,
    ) -> Self {
        Self {
            api,
            store,
            feed_type,
            feed_limit,
            authors_tx,
            shutdown: None,
        }
    }

    /// Stop between posts once shutdown is triggered, never mid-upsert.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// One full trending pass. The feed fetch and the snapshot append are
    /// load-bearing: failure there aborts the run. Per-post failures are
    /// counted and skipped.
    pub async fn run(&self) -> anyhow::Result<TrendingStats> {
        let mut stats = TrendingStats::default();
        let fetched_at = Utc::now();

        let entries = self.collect_feed(&mut stats).await?;
        stats.feed_entries = entries.len();

        let rows: Vec<SnapshotRow> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| SnapshotRow {
                rank: i as i32 + 1,
                post_id: e.id.clone(),
                raw: e.raw.clone(),
            })
            .collect();

        match self
            .store
            .append_feed_snapshot(&self.feed_type, fetched_at, &rows)
            .await
        {
            Ok(()) => {}
            Err(e @ StoreError::SnapshotConflict { .. }) => {
                // Another writer already recorded this instant. Duplicating
                // history is worse than losing one run, so stop here.
                return Err(e).context("feed snapshot rejected");
            }
            Err(e) => return Err(e).context("failed to append feed snapshot"),
        }

        if let Some(top) = entries.first() {
            self.store
                .put_cursor(&IngestCursor {
                    source: IngestCursor::feed_source(&self.feed_type),
                    cursor: None,
                    last_seen_id: Some(top.id.clone()),
                    last_seen_created_at: parse_timestamp(top.raw.get("created_at")),
                })
                .await
                .context("failed to record feed cursor")?;
        }

        let mut authors: BTreeSet<String> = BTreeSet::new();
        for entry in &entries {
            if self.shutdown.as_ref().is_some_and(Shutdown::is_cancelled) {
                info!(feed = %self.feed_type, "Shutdown requested, ending run early");
                break;
            }
            if let Err(e) = self.sync_entry(entry, &mut authors, &mut stats).await {
                stats.failures += 1;
                warn!(post_id = %entry.id, error = %e, "Post sync failed, continuing");
            }
        }

        stats.authors_discovered = authors.len();
        send_authors(&self.authors_tx, authors);

        info!(feed = %self.feed_type, %stats, "Trending sync complete");
        Ok(stats)
    }

    /// Page through the feed until the per-run item cap is reached or the
    /// remote reports no further pages.
    async fn collect_feed(&self, stats: &mut TrendingStats) -> anyhow::Result<Vec<FeedEntry>> {
        let cap = self.feed_limit as usize;
        let mut entries = Vec::new();
        let mut offset: Option<u64> = None;

        loop {
            let page = self
                .api
                .feed_page(&self.feed_type, self.feed_limit, offset)
                .await
                .context("feed page fetch failed")?;
            stats.pages += 1;
            let empty = page.entries.is_empty();
            entries.extend(page.entries);

            if entries.len() >= cap || !page.has_more || empty || stats.pages >= MAX_FEED_PAGES {
                break;
            }
            offset = page.next_offset.or(Some(entries.len() as u64));
        }

        entries.truncate(cap);
        Ok(entries)
    }

    /// Sync one feed entry. When the post's persisted comment counter
    /// matches the feed's claim and a comment cursor exists, the detail
    /// fetch is skipped entirely and only the listing payload is upserted.
    async fn sync_entry(
        &self,
        entry: &FeedEntry,
        authors: &mut BTreeSet<String>,
        stats: &mut TrendingStats,
    ) -> anyhow::Result<()> {
        let source = IngestCursor::comments_source(&entry.id);
        let cursor = self.store.get_cursor(&source).await?;
        let prev_count = self.store.post_comment_count(&entry.id).await?;

        if cursor.is_some() && prev_count == Some(entry.comment_count) {
            // Nothing changed since the last detail sync. Listing payloads
            // lack detail-only fields, so the stored row stays untouched;
            // only the author name is worth harvesting here.
            let author = parse_author_name(
                entry.raw.get("author").or_else(|| entry.raw.get("author_name")),
            );
            collect_author(authors, &author);
            stats.guard_skips += 1;
            return Ok(());
        }

        match sync_post_detail(
            self.api.as_ref(),
            self.store.as_ref(),
            &entry.id,
            cursor.as_ref(),
            false,
            authors,
        )
        .await?
        {
            Some(comments) => {
                stats.posts_synced += 1;
                stats.comments_synced += comments;
            }
            None => stats.posts_missing += 1,
        }
        Ok(())
    }
}

/// Fetch a post's detail and flatten its comment forest into the store.
///
/// Returns `Ok(None)` when the post no longer exists remotely. The walk
/// stops at the cursor's last seen id unless `force_full_walk` is set, in
/// which case every comment is re-upserted. The comment cursor is always
/// rewritten afterwards with its timestamp clamped to never move backwards.
pub(crate) async fn sync_post_detail<A: FeedApi, S: ContentStore>(
    api: &A,
    store: &S,
    post_id: &str,
    prev_cursor: Option<&IngestCursor>,
    force_full_walk: bool,
    authors: &mut BTreeSet<String>,
) -> anyhow::Result<Option<usize>> {
    let detail = match api.post_detail(post_id).await {
        Ok(detail) => detail,
        Err(ClientError::NotFound(_)) => {
            warn!(post_id, "Post no longer exists remotely, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e).context("post detail fetch failed"),
    };

    let post = Post::from_api(post_id, &detail.post);
    collect_author(authors, &post.author_name);
    store.upsert_post(&post).await?;

    let stop_id = if force_full_walk {
        None
    } else {
        prev_cursor.and_then(|c| c.last_seen_id.as_deref())
    };
    let flat = flatten_comments(&detail.comments, post_id, stop_id);

    for comment in &flat.comments {
        collect_author(authors, &comment.author_name);
        store.upsert_comment(comment).await?;
    }

    let prev_seen_at = prev_cursor.and_then(|c| c.last_seen_created_at);
    store
        .put_cursor(&IngestCursor {
            source: IngestCursor::comments_source(post_id),
            cursor: None,
            last_seen_id: flat
                .newest_id
                .or_else(|| prev_cursor.and_then(|c| c.last_seen_id.clone())),
            last_seen_created_at: match (prev_seen_at, flat.newest_created_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => b.or(a),
            },
        })
        .await?;

    Ok(Some(flat.comments.len()))
}

pub(crate) fn collect_author(authors: &mut BTreeSet<String>, name: &Option<String>) {
    if let Some(name) = name {
        authors.insert(name.clone());
    }
}

/// Hand discovered author names to the agent refresh job. The channel is
/// bounded; if the refresh job is far behind, dropping a batch is fine
/// because the names resurface on the next pass.
pub(crate) fn send_authors(tx: &mpsc::Sender<BTreeSet<String>>, authors: BTreeSet<String>) {
    if authors.is_empty() {
        return;
    }
    match tx.try_send(authors) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(batch)) => {
            warn!(count = batch.len(), "Author hand-off queue full, dropping batch");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
