//! Recap Storage crate - SQLite persistence and retention sweep.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! events, reports and delivery attempts, and the retention purge.

pub mod db;
pub mod deliveries;
pub mod events;
pub mod migrations;
pub mod reports;
pub mod retention;

pub use db::Database;
pub use deliveries::DeliveryRepository;
pub use events::{Assignment, EventFilter, EventRepository};
pub use reports::{FreezeClaim, FreezeCommit, ReportRepository};
pub use retention::{PurgeResult, RetentionSweeper};
