// Postgres persistence for the ingestion engine: idempotent upserts,
// append-only feed snapshots, and per-source ingest cursors.

pub mod error;

pub use error::{Result, StoreError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use sentinel_common::{Agent, Comment, IngestCursor, Post};

/// One (rank, post) pair of a feed snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub rank: i32,
    pub post_id: String,
    pub raw: Value,
}

#[derive(Debug, sqlx::FromRow)]
struct CursorRow {
    source: String,
    cursor: Option<String>,
    last_seen_id: Option<String>,
    last_seen_created_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SentinelStore {
    pool: PgPool,
}

impl SentinelStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Insert-or-update a post by id. Mutable fields and the raw payload are
    /// always overwritten and `last_synced_at` always advances, even when
    /// nothing visible changed. `first_seen_at` is set on insert only.
    pub async fn upsert_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts
                (id, submolt_name, author_name, title, content, url,
                 upvotes, downvotes, comment_count, last_comment_at,
                 created_at, updated_at, raw, first_seen_at, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                submolt_name = EXCLUDED.submolt_name,
                author_name = EXCLUDED.author_name,
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                url = EXCLUDED.url,
                upvotes = EXCLUDED.upvotes,
                downvotes = EXCLUDED.downvotes,
                comment_count = EXCLUDED.comment_count,
                last_comment_at = EXCLUDED.last_comment_at,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                raw = EXCLUDED.raw,
                last_synced_at = now()
            "#,
        )
        .bind(&post.id)
        .bind(&post.submolt_name)
        .bind(&post.author_name)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.url)
        .bind(post.upvotes)
        .bind(post.downvotes)
        .bind(post.comment_count)
        .bind(post.last_comment_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(&post.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_comment(&self, comment: &Comment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO comments
                (id, post_id, parent_id, author_name, content,
                 upvotes, downvotes, created_at, updated_at, raw,
                 first_seen_at, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                parent_id = EXCLUDED.parent_id,
                author_name = EXCLUDED.author_name,
                content = EXCLUDED.content,
                upvotes = EXCLUDED.upvotes,
                downvotes = EXCLUDED.downvotes,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                raw = EXCLUDED.raw,
                last_synced_at = now()
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.post_id)
        .bind(&comment.parent_id)
        .bind(&comment.author_name)
        .bind(&comment.content)
        .bind(comment.upvotes)
        .bind(comment.downvotes)
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .bind(&comment.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents
                (name, description, karma, follower_count, following_count,
                 is_claimed, is_active,
                 owner_x_handle, owner_x_name, owner_x_avatar, owner_x_bio,
                 owner_x_follower_count, owner_x_following_count, owner_x_verified,
                 last_active_at, raw, first_seen_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    now(), now())
            ON CONFLICT (name) DO UPDATE SET
                description = EXCLUDED.description,
                karma = EXCLUDED.karma,
                follower_count = EXCLUDED.follower_count,
                following_count = EXCLUDED.following_count,
                is_claimed = EXCLUDED.is_claimed,
                is_active = EXCLUDED.is_active,
                owner_x_handle = EXCLUDED.owner_x_handle,
                owner_x_name = EXCLUDED.owner_x_name,
                owner_x_avatar = EXCLUDED.owner_x_avatar,
                owner_x_bio = EXCLUDED.owner_x_bio,
                owner_x_follower_count = EXCLUDED.owner_x_follower_count,
                owner_x_following_count = EXCLUDED.owner_x_following_count,
                owner_x_verified = EXCLUDED.owner_x_verified,
                last_active_at = EXCLUDED.last_active_at,
                raw = EXCLUDED.raw,
                last_updated_at = now()
            "#,
        )
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.karma)
        .bind(agent.follower_count)
        .bind(agent.following_count)
        .bind(agent.is_claimed)
        .bind(agent.is_active)
        .bind(&agent.owner_x_handle)
        .bind(&agent.owner_x_name)
        .bind(&agent.owner_x_avatar)
        .bind(&agent.owner_x_bio)
        .bind(agent.owner_x_follower_count)
        .bind(agent.owner_x_following_count)
        .bind(agent.owner_x_verified)
        .bind(agent.last_active_at)
        .bind(&agent.raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one run's ranking rows under a single fetch instant. All rows
    /// go in one transaction; a uniqueness violation rolls the whole set back
    /// and surfaces as `SnapshotConflict` — snapshots are never overwritten.
    pub async fn append_feed_snapshot(
        &self,
        feed_type: &str,
        fetched_at: DateTime<Utc>,
        rows: &[SnapshotRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let res = sqlx::query(
                r#"
                INSERT INTO feed_snapshots (feed_type, fetched_at, rank, post_id, raw)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(feed_type)
            .bind(fetched_at)
            .bind(row.rank)
            .bind(&row.post_id)
            .bind(&row.raw)
            .execute(&mut *tx)
            .await;

            if let Err(e) = res {
                if is_unique_violation(&e) {
                    return Err(StoreError::SnapshotConflict {
                        feed_type: feed_type.to_string(),
                        fetched_at,
                        rank: row.rank,
                    });
                }
                return Err(e.into());
            }
        }
        tx.commit().await?;
        debug!(feed_type, rows = rows.len(), "Feed snapshot appended");
        Ok(())
    }

    /// Read the resumption cursor for a logical source stream.
    pub async fn get_cursor(&self, source: &str) -> Result<Option<IngestCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT source, cursor, last_seen_id, last_seen_created_at
            FROM ingest_state
            WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IngestCursor {
            source: r.source,
            cursor: r.cursor,
            last_seen_id: r.last_seen_id,
            last_seen_created_at: r.last_seen_created_at,
        }))
    }

    /// Full-row overwrite of a source cursor, last-write-wins.
    pub async fn put_cursor(&self, cursor: &IngestCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_state (source, cursor, last_seen_id, last_seen_created_at, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (source) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                last_seen_id = EXCLUDED.last_seen_id,
                last_seen_created_at = EXCLUDED.last_seen_created_at,
                updated_at = now()
            "#,
        )
        .bind(&cursor.source)
        .bind(&cursor.cursor)
        .bind(&cursor.last_seen_id)
        .bind(cursor.last_seen_created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The previously persisted comment counter for a post, if the post is
    /// known. Input to the incremental guard.
    pub async fn post_comment_count(&self, post_id: &str) -> Result<Option<i64>> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT comment_count FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count)
    }

    /// Agents due for a profile refresh: never refreshed or older than the
    /// threshold, most recently active first.
    pub async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT name FROM agents
            WHERE last_updated_at IS NULL OR last_updated_at < $1
            ORDER BY last_active_at DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// Distinct post ids that appeared in any snapshot within the trailing
    /// window. Input to the stale comment rescan.
    pub async fn trending_post_ids(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT post_id FROM feed_snapshots
            WHERE fetched_at >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
