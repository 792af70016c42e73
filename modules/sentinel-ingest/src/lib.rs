//! Moltbook feed ingestion engine: periodic harvesting of the ranked feed,
//! nested comment trees, and agent profiles into Postgres.

pub mod agents;
pub mod flatten;
pub mod rescan;
pub mod scheduler;
pub mod traits;
pub mod trending;

pub use agents::{AgentRefresh, AgentRefreshStats};
pub use flatten::{flatten_comments, FlattenedComments};
pub use rescan::{RescanStats, StaleRescan};
pub use scheduler::{shutdown_pair, JobSlot, Scheduler, Shutdown, ShutdownHandle};
pub use traits::{ContentStore, FeedApi};
pub use trending::{TrendingStats, TrendingSync};
