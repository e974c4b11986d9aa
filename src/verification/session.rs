use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::VerificationError;
use crate::classifier::{ClassifierReport, DoseClassifier};
use crate::collaborators::{DoseNotification, LogStore, NotificationSink};
use crate::models::{DoseLog, DoseOccurrence, NotificationKind, OccurrenceStatus};
use crate::photo::VerificationPhoto;

/// Self-report answers, question text to yes/no.
pub type Answers = BTreeMap<String, bool>;

/// Where a verification session stands. Each state carries only the data
/// valid in it; the photo never leaves the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationState {
    Capturing,
    Answering {
        #[serde(skip)]
        photo: VerificationPhoto,
        answers: Answers,
        /// Set when the last analysis failed; enables `skip_analysis`.
        last_error: Option<String>,
    },
    Analyzing {
        #[serde(skip)]
        photo: VerificationPhoto,
        answers: Answers,
    },
    Reviewing {
        #[serde(skip)]
        photo: VerificationPhoto,
        answers: Answers,
        analysis: Option<ClassifierReport>,
        /// Detected name differs from the expected medication. Advisory only.
        mismatch: bool,
    },
    Submitting {
        #[serde(skip)]
        photo: VerificationPhoto,
        answers: Answers,
        analysis: Option<ClassifierReport>,
        last_error: Option<String>,
    },
    Summary {
        log: DoseLog,
        answers: Answers,
        analysis: Option<ClassifierReport>,
    },
    Cancelled,
}

impl VerificationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Capturing => "capturing",
            Self::Answering { .. } => "answering",
            Self::Analyzing { .. } => "analyzing",
            Self::Reviewing { .. } => "reviewing",
            Self::Submitting { .. } => "submitting",
            Self::Summary { .. } => "summary",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Guided capture-and-confirm sequence for one current dose.
///
/// The target occurrence is fixed at open. The log store is written only
/// from `submitting`, and only for that target.
#[derive(Debug)]
pub struct VerificationSession {
    id: Uuid,
    target: DoseOccurrence,
    state: VerificationState,
}

impl VerificationSession {
    pub fn open(target: DoseOccurrence, now: DateTime<Utc>) -> Result<Self, VerificationError> {
        if target.status != OccurrenceStatus::Current {
            return Err(VerificationError::OccurrenceNotCurrent {
                id: target.id,
                status: target.status,
            });
        }

        let session = Self {
            id: Uuid::new_v4(),
            target,
            state: VerificationState::Capturing,
        };
        tracing::info!(
            session_id = %session.id,
            occurrence = %session.target.id,
            medication = %session.target.medication.name,
            opened_at = %now,
            "Verification session opened"
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &DoseOccurrence {
        &self.target
    }

    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Summary reached or cancelled: nothing more can happen.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            VerificationState::Summary { .. } | VerificationState::Cancelled
        )
    }

    fn invalid(&self, action: &'static str) -> VerificationError {
        VerificationError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    fn transition(&mut self, next: VerificationState) {
        tracing::debug!(
            session_id = %self.id,
            from = self.state.name(),
            to = next.name(),
            "Verification state change"
        );
        self.state = next;
    }

    /// capturing → answering.
    pub fn capture(&mut self, photo: VerificationPhoto) -> Result<(), VerificationError> {
        if !matches!(self.state, VerificationState::Capturing) {
            return Err(self.invalid("capture a photo"));
        }
        if photo.is_empty() {
            return Err(VerificationError::EmptyPhoto);
        }
        self.transition(VerificationState::Answering {
            photo,
            answers: Answers::new(),
            last_error: None,
        });
        Ok(())
    }

    /// Record a self-report answer. Answering again overwrites.
    pub fn answer(&mut self, question: &str, value: bool) -> Result<(), VerificationError> {
        match &mut self.state {
            VerificationState::Answering { answers, .. } => {
                answers.insert(question.trim().to_string(), value);
                Ok(())
            }
            _ => Err(self.invalid("answer questions")),
        }
    }

    /// answering → analyzing → reviewing, or back to answering on failure
    /// with photo and answers intact.
    pub fn analyze(&mut self, classifier: &dyn DoseClassifier) -> Result<&ClassifierReport, VerificationError> {
        let (photo, answers) = match std::mem::replace(&mut self.state, VerificationState::Cancelled) {
            VerificationState::Answering { photo, answers, .. } => (photo, answers),
            other => {
                self.state = other;
                return Err(self.invalid("analyze"));
            }
        };

        self.state = VerificationState::Analyzing {
            photo: photo.clone(),
            answers: answers.clone(),
        };

        match classifier.analyze(&photo, &self.target.medication.name) {
            Ok(report) => {
                let mismatch = !self.target.medication.name_matches(&report.detected_name);
                if mismatch {
                    tracing::info!(
                        session_id = %self.id,
                        expected = %self.target.medication.name,
                        detected = %report.detected_name,
                        "Detected medication differs from scheduled one"
                    );
                }
                self.transition(VerificationState::Reviewing {
                    photo,
                    answers,
                    analysis: Some(report),
                    mismatch,
                });
                match &self.state {
                    VerificationState::Reviewing {
                        analysis: Some(report),
                        ..
                    } => Ok(report),
                    _ => Err(self.invalid("analyze")),
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Photo analysis failed");
                self.transition(VerificationState::Answering {
                    photo,
                    answers,
                    last_error: Some(e.to_string()),
                });
                Err(VerificationError::Classifier(e))
            }
        }
    }

    /// After a classifier failure, go to review without an analysis.
    pub fn skip_analysis(&mut self) -> Result<(), VerificationError> {
        let (photo, answers) = match std::mem::replace(&mut self.state, VerificationState::Cancelled) {
            VerificationState::Answering {
                photo,
                answers,
                last_error: Some(_),
            } => (photo, answers),
            other => {
                self.state = other;
                return Err(self.invalid("skip analysis"));
            }
        };
        self.transition(VerificationState::Reviewing {
            photo,
            answers,
            analysis: None,
            mismatch: false,
        });
        Ok(())
    }

    /// reviewing → submitting → summary. A failed write stays in
    /// `submitting`; calling `submit` again retries the same write.
    pub fn submit(
        &mut self,
        store: &dyn LogStore,
        sink: &dyn NotificationSink,
        now: DateTime<Utc>,
    ) -> Result<&DoseLog, VerificationError> {
        let (photo, answers, analysis) =
            match std::mem::replace(&mut self.state, VerificationState::Cancelled) {
                VerificationState::Reviewing {
                    photo,
                    answers,
                    analysis,
                    ..
                }
                | VerificationState::Submitting {
                    photo,
                    answers,
                    analysis,
                    ..
                } => (photo, answers, analysis),
                other => {
                    self.state = other;
                    return Err(self.invalid("submit"));
                }
            };

        self.state = VerificationState::Submitting {
            photo: photo.clone(),
            answers: answers.clone(),
            analysis: analysis.clone(),
            last_error: None,
        };

        match self.write_taken(store, &photo, now) {
            Ok(log) => {
                tracing::info!(
                    session_id = %self.id,
                    log_id = %log.id,
                    medication_id = %self.target.medication_id(),
                    "Dose verified and logged"
                );
                sink.notify(&DoseNotification::for_occurrence(
                    NotificationKind::DoseTaken,
                    &self.target,
                    Some(log.id),
                    now,
                ));
                self.transition(VerificationState::Summary {
                    log,
                    answers,
                    analysis,
                });
                match &self.state {
                    VerificationState::Summary { log, .. } => Ok(log),
                    _ => Err(self.invalid("submit")),
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Dose submission failed");
                self.state = VerificationState::Submitting {
                    photo,
                    answers,
                    analysis,
                    last_error: Some(e.to_string()),
                };
                Err(VerificationError::Persistence(e))
            }
        }
    }

    fn write_taken(
        &self,
        store: &dyn LogStore,
        photo: &VerificationPhoto,
        now: DateTime<Utc>,
    ) -> Result<DoseLog, crate::db::DatabaseError> {
        let log_id = match self.target.log_id {
            Some(id) => id,
            None => {
                store
                    .create_log(
                        &self.target.medication.user_id,
                        &self.target.medication_id(),
                        self.target.scheduled_time,
                        now,
                    )?
                    .id
            }
        };
        store.mark_taken(&log_id, now, Some(photo))
    }

    /// Abandon the session. Not possible once submission has started.
    pub fn cancel(&mut self) -> Result<(), VerificationError> {
        match self.state {
            VerificationState::Submitting { .. }
            | VerificationState::Summary { .. }
            | VerificationState::Cancelled => Err(self.invalid("cancel")),
            _ => {
                tracing::info!(session_id = %self.id, state = self.state.name(), "Verification cancelled");
                self.transition(VerificationState::Cancelled);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, MockClassifier};
    use crate::collaborators::{InMemoryLogStore, RecordingSink};
    use crate::models::{LogStatus, Medication, OccurrenceId};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    fn lisinopril() -> Arc<Medication> {
        Arc::new(Medication {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            frequency: "once daily".into(),
            time_slots: vec!["08:00".into()],
            remaining_pills: 30,
            total_pills: 30,
            is_active: true,
        })
    }

    fn occurrence(status: OccurrenceStatus) -> DoseOccurrence {
        let medication = lisinopril();
        DoseOccurrence {
            id: OccurrenceId::new(&medication.id, &at(8, 0)),
            scheduled_time: at(8, 0),
            medication,
            status,
            log_id: None,
        }
    }

    fn photo() -> VerificationPhoto {
        VerificationPhoto::new(b"blister pack".to_vec())
    }

    fn reviewing_session(classifier: &MockClassifier) -> VerificationSession {
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        session.capture(photo()).unwrap();
        session.answer("Did you take the full dose?", true).unwrap();
        session.analyze(classifier).unwrap();
        session
    }

    #[test]
    fn only_current_occurrences_open() {
        for status in [OccurrenceStatus::Upcoming, OccurrenceStatus::Missed, OccurrenceStatus::Taken] {
            let err = VerificationSession::open(occurrence(status), at(8, 5)).unwrap_err();
            assert!(matches!(err, VerificationError::OccurrenceNotCurrent { .. }));
        }
        let session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        assert_eq!(session.state_name(), "capturing");
    }

    #[test]
    fn full_walk_through_to_summary() {
        let classifier = MockClassifier::detecting("Lisinopril");
        let store = InMemoryLogStore::new();
        let sink = RecordingSink::new();
        let mut session = reviewing_session(&classifier);

        match session.state() {
            VerificationState::Reviewing { mismatch, analysis, answers, .. } => {
                assert!(!mismatch);
                assert!(analysis.is_some());
                assert_eq!(answers.get("Did you take the full dose?"), Some(&true));
            }
            other => panic!("expected reviewing, got {}", other.name()),
        }

        let log = session.submit(&store, &sink, at(8, 6)).unwrap().clone();
        assert_eq!(log.status, LogStatus::Taken);
        assert_eq!(log.taken_at, Some(at(8, 6)));
        assert_eq!(log.created_at, at(8, 6));
        assert_eq!(log.verification_photo, Some(photo().reference()));
        assert_eq!(log.scheduled_time, at(8, 0));
        assert_eq!(session.state_name(), "summary");
        assert!(session.is_finished());
        assert_eq!(sink.kinds(), vec![NotificationKind::DoseTaken]);
        assert_eq!(sink.notifications()[0].log_id, Some(log.id));
    }

    #[test]
    fn existing_pending_log_is_reused() {
        let store = InMemoryLogStore::new();
        let mut target = occurrence(OccurrenceStatus::Current);
        let pending = store
            .create_log(
                &target.medication.user_id,
                &target.medication.id,
                target.scheduled_time,
                at(8, 1),
            )
            .unwrap();
        target.log_id = Some(pending.id);

        let mut session = VerificationSession::open(target, at(8, 5)).unwrap();
        session.capture(photo()).unwrap();
        session.analyze(&MockClassifier::detecting("Lisinopril")).unwrap();
        let log = session.submit(&store, &RecordingSink::new(), at(8, 6)).unwrap();
        assert_eq!(log.id, pending.id);
        assert_eq!(log.created_at, at(8, 1));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn mismatch_is_advisory() {
        let classifier = MockClassifier::detecting("Losartan");
        let mut session = reviewing_session(&classifier);
        assert!(matches!(session.state(), VerificationState::Reviewing { mismatch: true, .. }));

        let store = InMemoryLogStore::new();
        session.submit(&store, &RecordingSink::new(), at(8, 6)).unwrap();
        assert_eq!(session.state_name(), "summary");
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let classifier = MockClassifier::detecting("LISINOPRIL");
        let session = reviewing_session(&classifier);
        assert!(matches!(session.state(), VerificationState::Reviewing { mismatch: false, .. }));
    }

    #[test]
    fn submit_from_answering_rejected() {
        let store = InMemoryLogStore::new();
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        session.capture(photo()).unwrap();

        let err = session.submit(&store, &RecordingSink::new(), at(8, 6)).unwrap_err();
        assert!(matches!(err, VerificationError::InvalidTransition { action: "submit", state: "answering" }));
        assert_eq!(session.state_name(), "answering");
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn out_of_order_actions_rejected() {
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        assert!(session.answer("q", true).is_err());
        assert!(session.analyze(&MockClassifier::detecting("Lisinopril")).is_err());
        assert!(session.skip_analysis().is_err());
        assert_eq!(session.state_name(), "capturing");

        session.capture(photo()).unwrap();
        assert!(matches!(session.capture(photo()), Err(VerificationError::InvalidTransition { .. })));
    }

    #[test]
    fn empty_photo_keeps_capturing() {
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        assert!(matches!(session.capture(VerificationPhoto::new(Vec::new())), Err(VerificationError::EmptyPhoto)));
        assert_eq!(session.state_name(), "capturing");
    }

    #[test]
    fn classifier_failure_returns_to_answering_intact() {
        let classifier = MockClassifier::failing(ClassifierError::Connection("http://localhost:11434".into()));
        let store = InMemoryLogStore::new();
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        session.capture(photo()).unwrap();
        session.answer("Did you take it with water?", false).unwrap();

        let err = session.analyze(&classifier).unwrap_err();
        assert!(err.is_retryable());
        match session.state() {
            VerificationState::Answering { photo: kept, answers, last_error } => {
                assert_eq!(kept, &photo());
                assert_eq!(answers.get("Did you take it with water?"), Some(&false));
                assert!(last_error.is_some());
            }
            other => panic!("expected answering, got {}", other.name()),
        }
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn retry_after_classifier_failure() {
        let classifier = MockClassifier::with_outcomes(vec![
            Err(ClassifierError::Status { status: 500, body: "busy".into() }),
            Ok(crate::classifier::fallback_report("Lisinopril")),
        ]);
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        session.capture(photo()).unwrap();
        assert!(session.analyze(&classifier).is_err());
        let report = session.analyze(&classifier).unwrap();
        assert_eq!(report.confidence, 0.5);
        assert_eq!(session.state_name(), "reviewing");
    }

    #[test]
    fn skip_analysis_only_after_failure() {
        let mut session = VerificationSession::open(occurrence(OccurrenceStatus::Current), at(8, 5)).unwrap();
        session.capture(photo()).unwrap();
        assert!(session.skip_analysis().is_err());

        let _ = session.analyze(&MockClassifier::failing(ClassifierError::HttpClient("timeout".into())));
        session.skip_analysis().unwrap();
        assert!(matches!(
            session.state(),
            VerificationState::Reviewing { analysis: None, mismatch: false, .. }
        ));

        let store = InMemoryLogStore::new();
        let log = session.submit(&store, &RecordingSink::new(), at(8, 7)).unwrap();
        assert!(log.is_taken());
    }

    #[test]
    fn persistence_failure_stays_submitting_then_retries() {
        let classifier = MockClassifier::detecting("Lisinopril");
        let store = InMemoryLogStore::new();
        let sink = RecordingSink::new();
        let mut session = reviewing_session(&classifier);

        store.set_fail_writes(true);
        let err = session.submit(&store, &sink, at(8, 6)).unwrap_err();
        assert!(matches!(err, VerificationError::Persistence(_)));
        assert!(matches!(session.state(), VerificationState::Submitting { last_error: Some(_), .. }));
        assert!(session.cancel().is_err());
        assert!(sink.notifications().is_empty());

        store.set_fail_writes(false);
        session.submit(&store, &sink, at(8, 7)).unwrap();
        assert_eq!(session.state_name(), "summary");
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(sink.kinds(), vec![NotificationKind::DoseTaken]);
    }

    #[test]
    fn cancel_before_submit_writes_nothing() {
        let store = InMemoryLogStore::new();
        let classifier = MockClassifier::detecting("Lisinopril");
        let mut session = reviewing_session(&classifier);
        session.cancel().unwrap();

        assert_eq!(session.state_name(), "cancelled");
        assert!(session.is_finished());
        assert!(session.submit(&store, &RecordingSink::new(), at(8, 6)).is_err());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn state_serializes_without_photo() {
        let classifier = MockClassifier::detecting("Lisinopril");
        let session = reviewing_session(&classifier);
        let json = serde_json::to_value(session.state()).unwrap();
        assert_eq!(json["state"], "reviewing");
        assert_eq!(json["mismatch"], false);
        assert!(json.get("photo").is_none());
    }
}
