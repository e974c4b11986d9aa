//! Session-owning controller for one user's doses.
//!
//! `DoseTracker` wires the collaborators to the pure schedule functions and
//! owns the process-local state: at most one verification session and the
//! dismissed set for the missed banner.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::classifier::{ClassifierReport, DoseClassifier};
use crate::collaborators::{LogStore, MedicationDirectory, NotificationSink};
use crate::db::DatabaseError;
use crate::models::{DoseLog, DoseOccurrence, OccurrenceId};
use crate::photo::VerificationPhoto;
use crate::schedule::{
    adherence_summary, reconcile_from_sources, window_bounds, AdherenceSummary, DismissedSet,
    Reconciliation, ScheduleSettings, MAX_STREAK_DAYS,
};
use crate::verification::{
    confirm_missed_not_taken, confirm_missed_taken, VerificationError, VerificationSession,
    VerificationState,
};

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("A verification session is already open")]
    SessionAlreadyOpen,
    #[error("No verification session is open")]
    NoOpenSession,
    #[error("Occurrence not found: {0}")]
    OccurrenceNotFound(OccurrenceId),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Internal lock error")]
    LockPoisoned,
}

/// A completed submission and the timeline refreshed after it.
///
/// `reconciliation` is `None` when the post-write refresh failed; the log
/// is durable either way and the caller should refresh again later.
#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    pub log: DoseLog,
    pub reconciliation: Option<Reconciliation>,
}

// ═══════════════════════════════════════════════════════════
// DoseTracker
// ═══════════════════════════════════════════════════════════

pub struct DoseTracker {
    user_id: Uuid,
    directory: Arc<dyn MedicationDirectory>,
    store: Arc<dyn LogStore>,
    classifier: Arc<dyn DoseClassifier>,
    sink: Arc<dyn NotificationSink>,
    settings: ScheduleSettings,
    /// The one open verification session, if any.
    session: Mutex<Option<VerificationSession>>,
    dismissed: Mutex<DismissedSet>,
}

impl DoseTracker {
    pub fn new(
        user_id: Uuid,
        directory: Arc<dyn MedicationDirectory>,
        store: Arc<dyn LogStore>,
        classifier: Arc<dyn DoseClassifier>,
        sink: Arc<dyn NotificationSink>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            user_id,
            directory,
            store,
            classifier,
            sink,
            settings,
            session: Mutex::new(None),
            dismissed: Mutex::new(DismissedSet::new()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<VerificationSession>>, TrackerError> {
        self.session.lock().map_err(|_| TrackerError::LockPoisoned)
    }

    fn lock_dismissed(&self) -> Result<MutexGuard<'_, DismissedSet>, TrackerError> {
        self.dismissed.lock().map_err(|_| TrackerError::LockPoisoned)
    }

    fn reconcile_with<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        dismissed: &DismissedSet,
    ) -> Result<Reconciliation, TrackerError> {
        Ok(reconcile_from_sources(
            self.directory.as_ref(),
            self.store.as_ref(),
            &self.user_id,
            now,
            &self.settings,
            dismissed,
        )?)
    }

    /// Refresh after a committed write. A failure here must not turn the
    /// already-persisted write into an error, so it is logged and dropped.
    fn refresh_after_write<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        dismissed: &DismissedSet,
    ) -> Option<Reconciliation> {
        match self.reconcile_with(now, dismissed) {
            Ok(reconciliation) => Some(reconciliation),
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "Refresh after write failed");
                None
            }
        }
    }

    // ── Timeline ────────────────────────────────────────────

    /// Fresh timeline and missed banner.
    pub fn refresh<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Reconciliation, TrackerError> {
        let dismissed = self.lock_dismissed()?;
        self.reconcile_with(now, &dismissed)
    }

    /// Today's logs, streak and pills taken.
    pub fn adherence<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<AdherenceSummary, TrackerError> {
        let reconciliation = self.refresh(now)?;
        let medications = self.directory.list_medications(&self.user_id)?;
        let (_, to) = window_bounds(now, 0);
        let from = to - Duration::days(MAX_STREAK_DAYS + 1);
        let logs = self.store.list_logs(&self.user_id, from, to)?;

        Ok(adherence_summary(
            &medications,
            &logs,
            &reconciliation.occurrences,
            now,
        ))
    }

    /// Forget which missed doses were answered; they reappear in the banner.
    pub fn reset_dismissed(&self) -> Result<(), TrackerError> {
        self.lock_dismissed()?.clear();
        Ok(())
    }

    // ── Verification workflow ───────────────────────────────

    /// Open a verification session for a current occurrence.
    ///
    /// A finished session (summary or cancelled) is replaced; an unfinished
    /// one blocks.
    pub fn open_verification<Tz: TimeZone>(
        &self,
        occurrence_id: &OccurrenceId,
        now: &DateTime<Tz>,
    ) -> Result<VerificationState, TrackerError> {
        let mut slot = self.lock_session()?;
        if slot.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(TrackerError::SessionAlreadyOpen);
        }

        let reconciliation = self.refresh(now)?;
        let occurrence = reconciliation
            .find(occurrence_id)
            .cloned()
            .ok_or_else(|| TrackerError::OccurrenceNotFound(occurrence_id.clone()))?;

        let session = VerificationSession::open(occurrence, now.with_timezone(&Utc))?;
        let state = session.state().clone();
        *slot = Some(session);
        Ok(state)
    }

    fn with_session<R>(
        &self,
        f: impl FnOnce(&mut VerificationSession) -> Result<R, VerificationError>,
    ) -> Result<R, TrackerError> {
        let mut slot = self.lock_session()?;
        let session = slot
            .as_mut()
            .filter(|s| !s.is_finished())
            .ok_or(TrackerError::NoOpenSession)?;
        Ok(f(session)?)
    }

    /// Snapshot of the open (or just finished) session's state.
    pub fn session_state(&self) -> Result<Option<VerificationState>, TrackerError> {
        Ok(self.lock_session()?.as_ref().map(|s| s.state().clone()))
    }

    pub fn capture_photo(&self, photo: VerificationPhoto) -> Result<(), TrackerError> {
        self.with_session(|s| s.capture(photo))
    }

    pub fn answer(&self, question: &str, value: bool) -> Result<(), TrackerError> {
        self.with_session(|s| s.answer(question, value))
    }

    pub fn analyze(&self) -> Result<ClassifierReport, TrackerError> {
        let classifier = Arc::clone(&self.classifier);
        self.with_session(|s| s.analyze(classifier.as_ref()).cloned())
    }

    pub fn skip_analysis(&self) -> Result<(), TrackerError> {
        self.with_session(|s| s.skip_analysis())
    }

    /// Submit the dose; on success the timeline is refreshed.
    pub fn submit<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Submitted, TrackerError> {
        let now_utc = now.with_timezone(&Utc);
        let log = self.with_session(|s| {
            s.submit(self.store.as_ref(), self.sink.as_ref(), now_utc)
                .cloned()
        })?;
        let reconciliation = self.refresh_after_write(now, &*self.lock_dismissed()?);
        Ok(Submitted {
            log,
            reconciliation,
        })
    }

    /// Cancel and drop the open session.
    pub fn cancel_verification(&self) -> Result<(), TrackerError> {
        let mut slot = self.lock_session()?;
        let session = slot.as_mut().ok_or(TrackerError::NoOpenSession)?;
        session.cancel()?;
        *slot = None;
        Ok(())
    }

    /// Drop a finished session after its summary was shown.
    pub fn close_verification(&self) -> Result<(), TrackerError> {
        let mut slot = self.lock_session()?;
        let session = slot.as_ref().ok_or(TrackerError::NoOpenSession)?;
        if !session.is_finished() {
            return Err(VerificationError::InvalidTransition {
                action: "close",
                state: session.state_name(),
            }
            .into());
        }
        *slot = None;
        Ok(())
    }

    // ── Missed-dose banner ──────────────────────────────────

    fn missed_occurrence(
        reconciliation: &Reconciliation,
        occurrence_id: &OccurrenceId,
    ) -> Result<DoseOccurrence, TrackerError> {
        reconciliation
            .unresolved_missed
            .iter()
            .find(|o| &o.id == occurrence_id)
            .cloned()
            .ok_or_else(|| TrackerError::OccurrenceNotFound(occurrence_id.clone()))
    }

    /// The user took the missed dose after all. Returns the refreshed
    /// timeline, or `None` if only the refresh failed.
    pub fn confirm_missed_taken<Tz: TimeZone>(
        &self,
        occurrence_id: &OccurrenceId,
        now: &DateTime<Tz>,
    ) -> Result<Option<Reconciliation>, TrackerError> {
        let mut dismissed = self.lock_dismissed()?;
        let occurrence = Self::missed_occurrence(&self.reconcile_with(now, &dismissed)?, occurrence_id)?;
        confirm_missed_taken(
            &occurrence,
            self.store.as_ref(),
            self.sink.as_ref(),
            &mut dismissed,
            now.with_timezone(&Utc),
        )?;
        Ok(self.refresh_after_write(now, &dismissed))
    }

    /// The user did not take the missed dose. Same return contract as
    /// `confirm_missed_taken`.
    pub fn confirm_missed_not_taken<Tz: TimeZone>(
        &self,
        occurrence_id: &OccurrenceId,
        now: &DateTime<Tz>,
    ) -> Result<Option<Reconciliation>, TrackerError> {
        let mut dismissed = self.lock_dismissed()?;
        let occurrence = Self::missed_occurrence(&self.reconcile_with(now, &dismissed)?, occurrence_id)?;
        confirm_missed_not_taken(
            &occurrence,
            self.sink.as_ref(),
            &mut dismissed,
            now.with_timezone(&Utc),
        )?;
        Ok(self.refresh_after_write(now, &dismissed))
    }
}
