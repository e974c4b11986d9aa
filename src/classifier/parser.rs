use serde::Deserialize;

use super::ClassifierReport;

/// Confidence given to a report the model did not return as JSON.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

const UNKNOWN_MEDICATION: &str = "Unknown";

/// Parse the model's answer into a report.
///
/// Accepts a ```json fenced block, a bare fence, or bare JSON. Anything else
/// yields the fallback report naming the expected medication.
pub fn parse_classifier_response(response: &str, expected_name: &str) -> ClassifierReport {
    let json_str = extract_json(response);

    match serde_json::from_str::<RawReport>(json_str) {
        Ok(raw) => raw.into_report(),
        Err(e) => {
            tracing::warn!(
                error = %e,
                response_len = response.len(),
                "Classifier response is not JSON, using fallback report"
            );
            fallback_report(expected_name)
        }
    }
}

/// Low-confidence report asking the user to check the label themselves.
pub fn fallback_report(expected_name: &str) -> ClassifierReport {
    let name = expected_name.trim();
    ClassifierReport {
        detected_name: if name.is_empty() {
            UNKNOWN_MEDICATION.to_string()
        } else {
            name.to_string()
        },
        detected_dosage: Some("Please verify dosage".into()),
        frequency: Some("As directed".into()),
        pill_count: None,
        instructions: vec!["Take as prescribed by doctor".into()],
        warnings: vec!["Consult doctor for side effects".into()],
        confidence: FALLBACK_CONFIDENCE,
    }
}

fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    let fenced = trimmed
        .find("```json")
        .map(|start| start + 7)
        .or_else(|| trimmed.find("```").map(|start| start + 3));

    if let Some(content_start) = fenced {
        if let Some(len) = trimmed[content_start..].find("```") {
            return trimmed[content_start..content_start + len].trim();
        }
    }

    // Prose around a bare object: take the outermost braces.
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[derive(Deserialize)]
struct RawReport {
    medication_name: Option<String>,
    dosage: Option<String>,
    frequency: Option<String>,
    #[serde(default)]
    instructions: Option<Vec<String>>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    #[serde(default)]
    pill_count: Option<serde_json::Value>,
    confidence: Option<f64>,
}

impl RawReport {
    fn into_report(self) -> ClassifierReport {
        ClassifierReport {
            detected_name: self
                .medication_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNKNOWN_MEDICATION.to_string()),
            detected_dosage: non_empty(self.dosage),
            frequency: non_empty(self.frequency),
            pill_count: self.pill_count.as_ref().and_then(pill_count_lenient),
            instructions: self.instructions.unwrap_or_default(),
            warnings: self.warnings.unwrap_or_default(),
            confidence: self.confidence.unwrap_or(0.0).clamp(0.0, 1.0) as f32,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Models write counts as 12, 12.0 or "12"; anything else is dropped.
fn pill_count_lenient(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
