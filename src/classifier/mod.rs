//! Pill/prescription image classifier boundary.
//!
//! The engine treats the classifier as opaque: a photo and the expected
//! medication name go in, a `ClassifierReport` comes out. `OllamaDoseClassifier`
//! talks to a local vision model; `MockClassifier` backs the tests.

pub mod mock;
pub mod ollama;
pub mod parser;

pub use mock::*;
pub use ollama::*;
pub use parser::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::photo::VerificationPhoto;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Classifier not reachable at {0}")]
    Connection(String),

    #[error("Classifier returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Failed to parse classifier response: {0}")]
    ResponseParsing(String),

    #[error("Photo is empty")]
    EmptyPhoto,
}

/// What the classifier read off the photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierReport {
    pub detected_name: String,
    pub detected_dosage: Option<String>,
    pub frequency: Option<String>,
    pub pill_count: Option<u32>,
    pub instructions: Vec<String>,
    pub warnings: Vec<String>,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// Image classifier for dose verification photos.
pub trait DoseClassifier: Send + Sync {
    fn analyze(
        &self,
        photo: &VerificationPhoto,
        expected_name: &str,
    ) -> Result<ClassifierReport, ClassifierError>;
}
