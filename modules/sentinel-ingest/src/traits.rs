//! Seams between the jobs and the outside world. Jobs are generic over
//! these traits so tests can run them against in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use moltbook_client::{FeedPage, MoltbookClient, PostDetail};
use sentinel_common::{Agent, Comment, IngestCursor, Post};
use sentinel_store::{SentinelStore, SnapshotRow};

/// Read access to the remote Moltbook API.
#[async_trait]
pub trait FeedApi: Send + Sync {
    async fn feed_page(
        &self,
        feed: &str,
        limit: u32,
        offset: Option<u64>,
    ) -> moltbook_client::Result<FeedPage>;

    async fn post_detail(&self, post_id: &str) -> moltbook_client::Result<PostDetail>;

    async fn agent_profile(&self, name: &str) -> moltbook_client::Result<Value>;
}

#[async_trait]
impl FeedApi for MoltbookClient {
    async fn feed_page(
        &self,
        feed: &str,
        limit: u32,
        offset: Option<u64>,
    ) -> moltbook_client::Result<FeedPage> {
        self.fetch_feed_page(feed, limit, offset).await
    }

    async fn post_detail(&self, post_id: &str) -> moltbook_client::Result<PostDetail> {
        self.fetch_post_detail(post_id).await
    }

    async fn agent_profile(&self, name: &str) -> moltbook_client::Result<Value> {
        self.fetch_agent_profile(name).await
    }
}

/// Durable storage for ingested content and job state.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upsert_post(&self, post: &Post) -> sentinel_store::Result<()>;

    async fn upsert_comment(&self, comment: &Comment) -> sentinel_store::Result<()>;

    async fn upsert_agent(&self, agent: &Agent) -> sentinel_store::Result<()>;

    async fn append_feed_snapshot(
        &self,
        feed_type: &str,
        fetched_at: DateTime<Utc>,
        rows: &[SnapshotRow],
    ) -> sentinel_store::Result<()>;

    async fn get_cursor(&self, source: &str) -> sentinel_store::Result<Option<IngestCursor>>;

    async fn put_cursor(&self, cursor: &IngestCursor) -> sentinel_store::Result<()>;

    async fn post_comment_count(&self, post_id: &str) -> sentinel_store::Result<Option<i64>>;

    async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> sentinel_store::Result<Vec<String>>;

    async fn trending_post_ids(&self, since: DateTime<Utc>) -> sentinel_store::Result<Vec<String>>;
}

#[async_trait]
impl ContentStore for SentinelStore {
    async fn upsert_post(&self, post: &Post) -> sentinel_store::Result<()> {
        SentinelStore::upsert_post(self, post).await
    }

    async fn upsert_comment(&self, comment: &Comment) -> sentinel_store::Result<()> {
        SentinelStore::upsert_comment(self, comment).await
    }

    async fn upsert_agent(&self, agent: &Agent) -> sentinel_store::Result<()> {
        SentinelStore::upsert_agent(self, agent).await
    }

    async fn append_feed_snapshot(
        &self,
        feed_type: &str,
        fetched_at: DateTime<Utc>,
        rows: &[SnapshotRow],
    ) -> sentinel_store::Result<()> {
        SentinelStore::append_feed_snapshot(self, feed_type, fetched_at, rows).await
    }

    async fn get_cursor(&self, source: &str) -> sentinel_store::Result<Option<IngestCursor>> {
        SentinelStore::get_cursor(self, source).await
    }

    async fn put_cursor(&self, cursor: &IngestCursor) -> sentinel_store::Result<()> {
        SentinelStore::put_cursor(self, cursor).await
    }

    async fn post_comment_count(&self, post_id: &str) -> sentinel_store::Result<Option<i64>> {
        SentinelStore::post_comment_count(self, post_id).await
    }

    async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> sentinel_store::Result<Vec<String>> {
        SentinelStore::refresh_candidates(self, stale_before, limit).await
    }

    async fn trending_post_ids(&self, since: DateTime<Utc>) -> sentinel_store::Result<Vec<String>> {
        SentinelStore::trending_post_ids(self, since).await
    }
}
