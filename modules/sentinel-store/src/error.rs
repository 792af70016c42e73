use chrono::{DateTime, Utc};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A snapshot row for this (feed_type, fetched_at, rank) already exists.
    /// Snapshots are immutable; hitting this means a scheduling or clock bug
    /// and aborts the run.
    #[error("Snapshot row already exists for ({feed_type}, {fetched_at}, rank {rank})")]
    SnapshotConflict {
        feed_type: String,
        fetched_at: DateTime<Utc>,
        rank: i32,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
