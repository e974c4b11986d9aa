use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::parser::parse_classifier_response;
use super::{ClassifierError, ClassifierReport, DoseClassifier};
use crate::config::TrackerConfig;
use crate::photo::VerificationPhoto;

const SYSTEM_PROMPT: &str = "You are a medication verification assistant. \
Read the medication label, blister pack or pills in the photo and report what you see. \
Always answer with a single JSON object and nothing else.";

const USER_PROMPT_TEMPLATE: &str = r#"The patient says this photo shows "{expected}".
Extract the following as JSON:
{
  "medication_name": "name printed on the package",
  "dosage": "dosage amount and unit",
  "frequency": "how often to take it, if printed",
  "instructions": ["taking instructions"],
  "warnings": ["warnings or side effects"],
  "pill_count": number_of_pills_if_visible,
  "confidence": confidence_score_0_to_1
}
Use null for anything you cannot read."#;

/// Vision classifier backed by a local Ollama instance (`/api/chat`).
pub struct OllamaDoseClassifier {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaDoseClassifier {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ClassifierError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClassifierError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, ClassifierError> {
        Self::new(
            &config.ollama_url,
            &config.vision_model,
            config.classifier_timeout_secs,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, photo: &VerificationPhoto, expected_name: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                    images: None,
                },
                ChatMessage {
                    role: "user".into(),
                    content: USER_PROMPT_TEMPLATE.replace("{expected}", expected_name.trim()),
                    images: Some(vec![photo.to_base64()]),
                },
            ],
            stream: false,
            format: "json".into(),
        }
    }
}

/// Request body for Ollama /api/chat
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

/// Response body from Ollama /api/chat (non-streaming)
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl DoseClassifier for OllamaDoseClassifier {
    fn analyze(
        &self,
        photo: &VerificationPhoto,
        expected_name: &str,
    ) -> Result<ClassifierReport, ClassifierError> {
        if photo.is_empty() {
            return Err(ClassifierError::EmptyPhoto);
        }

        let _span = tracing::info_span!(
            "dose_classifier_analyze",
            model = %self.model,
            image_size = photo.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(photo, expected_name);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ClassifierError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    ClassifierError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    ClassifierError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ClassifierError::ResponseParsing(e.to_string()))?;

        let report = parse_classifier_response(&parsed.message.content, expected_name);

        tracing::info!(
            model = %self.model,
            elapsed_ms = %start.elapsed().as_millis(),
            confidence = report.confidence,
            pill_count = ?report.pill_count,
            "Dose photo analysis complete"
        );

        Ok(report)
    }
}
