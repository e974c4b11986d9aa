//! Dose confirmation flows.
//!
//! `session` is the photo-verified workflow for a current dose; `missed`
//! resolves a missed dose retroactively without a photo. Both write to the
//! log store only through the `LogStore` trait.

pub mod missed;
pub mod session;

pub use missed::*;
pub use session::*;

use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::db::DatabaseError;
use crate::models::{OccurrenceId, OccurrenceStatus};

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Occurrence {id} is {status}, only current doses can be verified")]
    OccurrenceNotCurrent {
        id: OccurrenceId,
        status: OccurrenceStatus,
    },

    #[error("Occurrence {id} is {status}, only missed doses can be confirmed")]
    OccurrenceNotMissed {
        id: OccurrenceId,
        status: OccurrenceStatus,
    },

    #[error("Captured photo is empty")]
    EmptyPhoto,

    #[error("Photo analysis failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Saving the dose failed: {0}")]
    Persistence(#[from] DatabaseError),
}

impl VerificationError {
    /// Whether repeating the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Classifier(_) | Self::Persistence(_))
    }
}
