//! Embedded persistence layer (C5): connection pool, schema migrations,
//! batched writes, materialized-view refresh, pruning/archival, backup, and
//! query metrics. Grounded in the teacher's `config_db.rs` (rusqlite
//! connection/migration idiom) and `usage_tracker.rs` (mpsc-fed batched
//! background writer).

pub mod maintenance;
pub mod metrics;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod writer;

pub use metrics::{QueryMetrics, VerbStats};
pub use pool::Pool;
pub use writer::{BatchWriter, WriteBatch};
