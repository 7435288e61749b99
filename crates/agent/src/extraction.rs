use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use loanline_core::loan::InfoType;
use loanline_core::session::PartialCredentials;

use crate::llm::{LlmClient, LlmError, LlmRequest};

/// Sentinel the collaborator must return when no candidate matches.
const NO_MATCH_SENTINEL: &str = "UNKNOWN";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Generation(#[from] LlmError),
    #[error("collaborator returned unusable output: {0}")]
    Unusable(String),
}

/// Pulls structured data out of free text. Deterministic fast paths run
/// first and skip the collaborator whenever the input is already
/// unambiguous; collaborator output is always re-validated before use.
pub struct ExtractionAdapter {
    llm: Arc<dyn LlmClient>,
}

impl ExtractionAdapter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Ask the collaborator which candidate organization the message
    /// mentions. Returns the matched candidate key, or `None` when it
    /// answers with the no-match sentinel or anything outside the list.
    pub async fn extract_tenant(
        &self,
        text: &str,
        candidates: &[&str],
    ) -> Result<Option<String>, ExtractionError> {
        let instruction = format!(
            "A cooperative member wrote: \"{}\"\n\
             Which one of these organizations are they referring to?\n{}\n\
             Reply with exactly one name from the list, or {NO_MATCH_SENTINEL} if none fits.",
            text.trim(),
            candidates.join(", "),
        );

        let reply = self.llm.complete(&LlmRequest::small(instruction)).await?;
        let stripped = strip_code_fences(&reply);
        let normalized = loanline_core::tenant::normalize(&first_line(&stripped));

        if normalized.is_empty() || normalized == NO_MATCH_SENTINEL {
            return Ok(None);
        }

        Ok(candidates.iter().find(|candidate| **candidate == normalized).map(|c| c.to_string()))
    }

    /// Extract `{email, employee_number}` from free text, both nullable.
    /// When the deterministic scan already finds both, the collaborator is
    /// not consulted; when the collaborator fails but the scan found
    /// something, the scan result is used as a degraded answer.
    pub async fn extract_credentials(
        &self,
        text: &str,
    ) -> Result<PartialCredentials, ExtractionError> {
        let scanned = scan_credentials(text);
        if scanned.email.is_some() && scanned.employee_number.is_some() {
            debug!(event_name = "extraction.credentials.fast_path", "scan found both fields");
            return Ok(scanned);
        }

        let instruction = format!(
            "Extract the member's credentials from this message: \"{}\"\n\
             Reply with strict JSON only: {{\"email\": string or null, \
             \"employee_number\": string or null}}. Do not guess missing values.",
            text.trim(),
        );

        match self.llm.complete(&LlmRequest::small(instruction)).await {
            Ok(reply) => {
                let mut extracted = parse_credentials_reply(&reply)?;
                if extracted.email.is_none() {
                    extracted.email = scanned.email;
                }
                if extracted.employee_number.is_none() {
                    extracted.employee_number = scanned.employee_number;
                }
                Ok(extracted)
            }
            Err(error) if !scanned.is_empty() => {
                debug!(
                    event_name = "extraction.credentials.degraded",
                    error = %error,
                    "collaborator failed, using scanned fields"
                );
                Ok(scanned)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Classify a loan question into an info type. Keyword matching comes
    /// first; the collaborator only breaks ties for free-form phrasings, and
    /// any failure degrades to `Details`.
    pub async fn classify_loan_query(&self, text: &str) -> InfoType {
        if let Some(info_type) = InfoType::classify(text) {
            return info_type;
        }

        let instruction = format!(
            "A member asked about their loan: \"{}\"\n\
             Classify the question as exactly one of: STATUS, AMOUNT, PAYMENT, \
             ELIGIBILITY, HISTORY, DETAILS. Reply with the single word only.",
            text.trim(),
        );

        match self.llm.complete(&LlmRequest::small(instruction)).await {
            Ok(reply) => {
                let stripped = strip_code_fences(&reply);
                InfoType::parse_or_default(&first_line(&stripped))
            }
            Err(_) => InfoType::Details,
        }
    }
}

/// Deterministic credential scan: an `@`-bearing token that passes the email
/// shape check, and a standalone digit run for the employee number.
fn scan_credentials(text: &str) -> PartialCredentials {
    let mut email = None;
    let mut employee_number = None;

    for token in text.split_whitespace() {
        let trimmed = token
            .trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '@' && ch != '.')
            .trim_end_matches('.');
        if trimmed.contains('@') {
            if email.is_none() && is_valid_email(trimmed) {
                email = Some(trimmed.to_string());
            }
            continue;
        }

        let digits = trimmed.trim_start_matches('#');
        if employee_number.is_none()
            && (2..=10).contains(&digits.len())
            && digits.chars().all(|ch| ch.is_ascii_digit())
        {
            employee_number = Some(digits.to_string());
        }
    }

    PartialCredentials { email, employee_number }
}

/// Standard `local@domain.tld` shape: one `@`, non-empty local part, dotted
/// domain with an alphabetic TLD of at least two characters.
pub fn is_valid_email(candidate: &str) -> bool {
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = candidate.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && tld.len() >= 2 && tld.chars().all(|ch| ch.is_ascii_alphabetic())
}

fn parse_credentials_reply(reply: &str) -> Result<PartialCredentials, ExtractionError> {
    let stripped = strip_code_fences(reply);
    let json = extract_json_object(&stripped)
        .ok_or_else(|| ExtractionError::Unusable(format!("no JSON object in `{stripped}`")))?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|error| ExtractionError::Unusable(format!("bad JSON: {error}")))?;

    let email = value
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string);
    let employee_number = match value.get("employee_number") {
        Some(Value::String(raw)) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    };

    Ok(PartialCredentials { email, employee_number })
}

/// Remove markdown code-fence wrappers the collaborator likes to add.
pub fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First balanced top-level JSON object in raw text. Tolerates prose around
/// the payload while leaving strict validation to the JSON parser.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let mut start = None;
    let mut depth: i32 = 0;
    for (idx, ch) in raw.char_indices() {
        if ch == '{' {
            if start.is_none() {
                start = Some(idx);
            }
            depth += 1;
        } else if ch == '}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start {
                    return Some(raw[s..=idx].to_string());
                }
            }
        }
    }
    None
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use loanline_core::loan::InfoType;

    use super::{
        extract_json_object, is_valid_email, scan_credentials, strip_code_fences,
        ExtractionAdapter,
    };
    use crate::llm::{LlmClient, LlmError, LlmRequest};

    struct ScriptedLlm {
        reply: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            self.reply.map(str::to_string).map_err(|error| LlmError(error.to_string()))
        }
    }

    fn adapter(reply: Result<&'static str, &'static str>) -> ExtractionAdapter {
        ExtractionAdapter::new(Arc::new(ScriptedLlm { reply }))
    }

    #[test]
    fn email_shape_validation() {
        assert!(is_valid_email("maria@coop.org"));
        assert!(is_valid_email("m.lopez@mail.coop.org"));
        assert!(!is_valid_email("maria@coop"));
        assert!(!is_valid_email("@coop.org"));
        assert!(!is_valid_email("maria at coop.org"));
        assert!(!is_valid_email("maria@coop.o1"));
    }

    #[test]
    fn scan_finds_email_and_employee_number() {
        let scanned =
            scan_credentials("my email is maria@coop.org and my employee number is 4521.");
        assert_eq!(scanned.email.as_deref(), Some("maria@coop.org"));
        assert_eq!(scanned.employee_number.as_deref(), Some("4521"));
    }

    #[test]
    fn scan_does_not_mistake_email_digits_for_employee_number() {
        let scanned = scan_credentials("reach me at maria2024@coop.org");
        assert_eq!(scanned.email.as_deref(), Some("maria2024@coop.org"));
        assert_eq!(scanned.employee_number, None);
    }

    #[test]
    fn fence_stripping_and_json_extraction() {
        let raw = "```json\n{\"email\": \"a@b.co\", \"employee_number\": null}\n```";
        let stripped = strip_code_fences(raw);
        assert!(!stripped.contains("```"));
        let json = extract_json_object(&stripped).expect("object");
        assert!(json.starts_with('{') && json.ends_with('}'));
    }

    #[test]
    fn json_extraction_tolerates_surrounding_prose() {
        let raw = "Sure! Here you go: {\"email\": \"a@b.co\"} hope that helps";
        assert_eq!(extract_json_object(raw).as_deref(), Some("{\"email\": \"a@b.co\"}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[tokio::test]
    async fn credentials_fast_path_skips_the_collaborator() {
        // The scripted collaborator would fail; the fast path must not call it.
        let adapter = adapter(Err("collaborator should not be called"));
        let extracted = adapter
            .extract_credentials("email maria@coop.org, employee number 4521")
            .await
            .expect("fast path");
        assert_eq!(extracted.email.as_deref(), Some("maria@coop.org"));
        assert_eq!(extracted.employee_number.as_deref(), Some("4521"));
    }

    #[tokio::test]
    async fn collaborator_fills_fields_the_scan_missed() {
        let adapter = adapter(Ok("{\"email\": null, \"employee_number\": \"7788\"}"));
        let extracted =
            adapter.extract_credentials("maria@coop.org, badge seven seven eight eight").await
                .expect("extraction");
        assert_eq!(extracted.email.as_deref(), Some("maria@coop.org"));
        assert_eq!(extracted.employee_number.as_deref(), Some("7788"));
    }

    #[tokio::test]
    async fn collaborator_failure_degrades_to_scanned_fields() {
        let adapter = adapter(Err("model offline"));
        let extracted =
            adapter.extract_credentials("it's maria@coop.org").await.expect("degraded");
        assert_eq!(extracted.email.as_deref(), Some("maria@coop.org"));
        assert_eq!(extracted.employee_number, None);
    }

    #[tokio::test]
    async fn numeric_employee_number_in_json_is_accepted() {
        let adapter = adapter(Ok("{\"email\": \"a@b.co\", \"employee_number\": 4521}"));
        let extracted = adapter.extract_credentials("hello").await.expect("extraction");
        assert_eq!(extracted.employee_number.as_deref(), Some("4521"));
    }

    #[tokio::test]
    async fn tenant_extraction_honors_the_no_match_sentinel() {
        let adapter = adapter(Ok("UNKNOWN"));
        let result = adapter
            .extract_tenant("we're a bakery", &["FUSION", "IMMIGRATION"])
            .await
            .expect("extraction");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn tenant_extraction_rejects_names_outside_the_candidate_list() {
        let adapter = adapter(Ok("ACME"));
        let result = adapter
            .extract_tenant("we're with acme", &["FUSION", "IMMIGRATION"])
            .await
            .expect("extraction");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn tenant_extraction_matches_a_candidate_case_insensitively() {
        let adapter = adapter(Ok("fusion.\n"));
        let result = adapter
            .extract_tenant("the fusion one", &["FUSION", "IMMIGRATION"])
            .await
            .expect("extraction");
        assert_eq!(result.as_deref(), Some("FUSION"));
    }

    #[tokio::test]
    async fn loan_query_classification_prefers_keywords() {
        let adapter = adapter(Err("collaborator should not be called"));
        assert_eq!(adapter.classify_loan_query("what is my loan status").await, InfoType::Status);
    }

    #[tokio::test]
    async fn loan_query_classification_degrades_to_details() {
        let adapter = adapter(Err("model offline"));
        assert_eq!(adapter.classify_loan_query("tell me about my loan").await, InfoType::Details);
    }
}
