//! Normalization of raw model output into structured payloads.
//!
//! Models are asked for JSON but do not reliably produce it. A failed parse is
//! not an error: the raw text is wrapped and returned, because the user still
//! benefits from seeing the answer.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
    /// False when the model's output could not be parsed and `body` carries
    /// the raw text.
    pub structured: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightReport {
    pub summary: String,
    pub insights: Vec<String>,
    pub structured: bool,
}

#[derive(Deserialize)]
struct EmailDraftWire {
    subject: String,
    body: String,
}

#[derive(Deserialize)]
struct InsightReportWire {
    summary: String,
    #[serde(default)]
    insights: Vec<String>,
}

pub fn normalize_email(raw: &str) -> EmailDraft {
    if let Some(block) = extract_json_block(raw) {
        if let Ok(wire) = serde_json::from_str::<EmailDraftWire>(&block) {
            return EmailDraft { subject: wire.subject, body: wire.body, structured: true };
        }
    }
    EmailDraft { subject: String::new(), body: raw.trim().to_string(), structured: false }
}

pub fn normalize_insights(raw: &str) -> InsightReport {
    if let Some(block) = extract_json_block(raw) {
        if let Ok(wire) = serde_json::from_str::<InsightReportWire>(&block) {
            return InsightReport {
                summary: wire.summary,
                insights: wire.insights,
                structured: true,
            };
        }
    }
    InsightReport { summary: raw.trim().to_string(), insights: Vec::new(), structured: false }
}

/// Pull the first JSON object out of model text, tolerating markdown code
/// fences and prose around the braces.
fn extract_json_block(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.split("```").next()?
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.split("```").next()?
    } else {
        trimmed
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| body[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use crate::normalize::{extract_json_block, normalize_email, normalize_insights};

    #[test]
    fn bare_json_email_is_parsed_as_structured() {
        let draft = normalize_email(r#"{"subject": "Renewal", "body": "Hi Dana,\n..."}"#);
        assert!(draft.structured);
        assert_eq!(draft.subject, "Renewal");
        assert!(draft.body.starts_with("Hi Dana"));
    }

    #[test]
    fn fenced_json_email_is_parsed_as_structured() {
        let raw = "Sure! Here is the draft:\n```json\n{\"subject\": \"Q3 check-in\", \"body\": \"Hello\"}\n```";
        // prose before the fence means the fence prefix match fails, but the
        // brace scan still finds the object
        let draft = normalize_email(raw);
        assert!(draft.structured);
        assert_eq!(draft.subject, "Q3 check-in");
    }

    #[test]
    fn unparseable_email_output_degrades_to_raw_body() {
        let raw = "Dear customer, thanks for your time last week...";
        let draft = normalize_email(raw);
        assert!(!draft.structured);
        assert_eq!(draft.body, raw);
        assert!(draft.subject.is_empty());
    }

    #[test]
    fn insights_parse_summary_and_list() {
        let raw = r#"{"summary": "Pipeline is healthy", "insights": ["Close deal A", "Call B"]}"#;
        let report = normalize_insights(raw);
        assert!(report.structured);
        assert_eq!(report.summary, "Pipeline is healthy");
        assert_eq!(report.insights.len(), 2);
    }

    #[test]
    fn insights_fallback_keeps_the_raw_answer() {
        let raw = "Your pipeline looks fine overall.";
        let report = normalize_insights(raw);
        assert!(!report.structured);
        assert_eq!(report.summary, raw);
        assert!(report.insights.is_empty());
    }

    #[test]
    fn json_block_extraction_handles_fences_and_prose() {
        assert_eq!(
            extract_json_block("```json\n{\"a\": 1}\n```").as_deref(),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_block("noise {\"a\": 1} noise").as_deref(), Some("{\"a\": 1}"));
        assert_eq!(extract_json_block("no braces here"), None);
    }
}
