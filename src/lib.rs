pub mod classifier; // Pill photo analysis (Ollama vision)
pub mod collaborators; // Directory / log store / notification traits
pub mod config;
pub mod db;
pub mod models;
pub mod photo;
pub mod schedule; // Occurrence generation + reconciliation
pub mod tracker; // Session-owning controller
pub mod verification; // Photo verification + missed-dose flows

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::classifier::{ClassifierError, OllamaDoseClassifier};
use crate::config::TrackerConfig;
use crate::db::repository::SqliteStore;
use crate::db::DatabaseError;
use crate::schedule::{AdherenceSummary, Reconciliation, ScheduleSettings};
use crate::tracker::{DoseTracker, TrackerError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Usage: dosekeeper <user-id>")]
    Usage,
    #[error("Invalid user id '{0}'")]
    InvalidUserId(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Classifier setup failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot printed by the binary: timeline, missed banner and adherence.
#[derive(Debug, Serialize)]
pub struct DoseReport {
    pub generated_at: DateTime<Utc>,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
    pub adherence: AdherenceSummary,
}

pub fn build_report<Tz: TimeZone>(
    tracker: &DoseTracker,
    now: &DateTime<Tz>,
) -> Result<DoseReport, TrackerError> {
    Ok(DoseReport {
        generated_at: now.with_timezone(&Utc),
        user_id: tracker.user_id(),
        reconciliation: tracker.refresh(now)?,
        adherence: tracker.adherence(now)?,
    })
}

fn report_for(user_arg: Option<String>, config: &TrackerConfig) -> Result<String, AppError> {
    let raw = user_arg.ok_or(AppError::Usage)?;
    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidUserId(raw.clone()))?;

    let db_path = config::database_path();
    tracing::info!(path = %db_path.display(), "Opening dose database");
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let tracker = DoseTracker::new(
        user_id,
        store.clone(),
        store.clone(),
        Arc::new(OllamaDoseClassifier::from_config(config)?),
        store,
        ScheduleSettings::from(config),
    );

    let report = build_report(&tracker, &Local::now())?;
    tracing::info!(
        occurrences = report.reconciliation.occurrences.len(),
        missed = report.reconciliation.unresolved_missed.len(),
        "Dose report ready"
    );
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn run() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = TrackerConfig::from_env();
    match report_for(std::env::args().nth(1), &config) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Dose report failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
