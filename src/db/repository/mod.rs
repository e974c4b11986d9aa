//! Repository layer: entity-scoped database operations.
//!
//! Free functions take a `&Connection`; `SqliteStore` wraps a connection and
//! implements the engine's collaborator traits on top of them.

mod dose_log;
mod medication;
mod notification;
mod store;

pub use dose_log::*;
pub use medication::*;
pub use notification::*;
pub use store::*;

use chrono::{DateTime, Utc};

use super::DatabaseError;

/// Dose slots are stored as whole unix seconds.
pub(crate) fn ts_to_datetime(ts: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp(ts, 0).ok_or(DatabaseError::InvalidTimestamp(ts))
}
