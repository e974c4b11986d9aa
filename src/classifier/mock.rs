use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ClassifierError, ClassifierReport, DoseClassifier};
use crate::photo::VerificationPhoto;

/// Mock classifier for testing. Replays queued outcomes, then repeats the last.
pub struct MockClassifier {
    outcomes: Mutex<Vec<Result<ClassifierReport, ClassifierError>>>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn returning(report: ClassifierReport) -> Self {
        Self::with_outcomes(vec![Ok(report)])
    }

    pub fn failing(error: ClassifierError) -> Self {
        Self::with_outcomes(vec![Err(error)])
    }

    /// Outcomes are served in order; the final one repeats.
    pub fn with_outcomes(outcomes: Vec<Result<ClassifierReport, ClassifierError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
    }

    /// A confident report naming `name`.
    pub fn detecting(name: &str) -> Self {
        Self::returning(ClassifierReport {
            detected_name: name.to_string(),
            detected_dosage: Some("10mg".into()),
            frequency: None,
            pill_count: Some(1),
            instructions: Vec::new(),
            warnings: Vec::new(),
            confidence: 0.9,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DoseClassifier for MockClassifier {
    fn analyze(
        &self,
        photo: &VerificationPhoto,
        _expected_name: &str,
    ) -> Result<ClassifierReport, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if photo.is_empty() {
            return Err(ClassifierError::EmptyPhoto);
        }

        let mut outcomes = self
            .outcomes
            .lock()
            .map_err(|_| ClassifierError::HttpClient("mock lock poisoned".into()))?;
        match outcomes.len() {
            0 => Err(ClassifierError::ResponseParsing("no mock outcome queued".into())),
            1 => outcomes[0].clone(),
            _ => outcomes.remove(0),
        }
    }
}
