//! Dose schedule: occurrence generation, status classification and
//! reconciliation against dose logs. Everything here is pure except
//! `reconcile_from_sources`, which only reads from collaborators.

pub mod generator;
pub mod status;
pub mod reconcile;
pub mod adherence;

pub use generator::*;
pub use status::*;
pub use reconcile::*;
pub use adherence::*;

use thiserror::Error;

/// Malformed medication input, rejected before generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid time slot '{0}', expected HH:MM")]
    InvalidTimeSlot(String),

    #[error("Time slots out of order: '{later}' listed after '{earlier}'")]
    NonMonotonicSlots { earlier: String, later: String },

    #[error("Remaining pills ({remaining}) exceed total ({total})")]
    InvalidPillCount { remaining: u32, total: u32 },
}
