use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use loanline_core::loan::{
    is_empty_loan_data, render_fallback, sanitize, InfoType, NO_ACTIVE_LOAN_MESSAGE,
};

use crate::llm::{LlmClient, LlmRequest};

/// Longest serialized record slice handed to the collaborator.
const MAX_RECORD_CHARS: usize = 2000;
/// Replies longer than this are treated as runaway output and discarded.
const MAX_USABLE_REPLY_CHARS: usize = 600;

/// Turns a sanitized loan payload into one user-facing answer. The
/// collaborator phrases the reply; every failure or unusable reply falls
/// back to the deterministic template renderer.
pub struct LoanAnswers {
    llm: Arc<dyn LlmClient>,
}

impl LoanAnswers {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn render(&self, record: &Value, info_type: InfoType) -> String {
        if is_empty_loan_data(record) {
            return NO_ACTIVE_LOAN_MESSAGE.to_string();
        }

        let sanitized = sanitize(record);
        let serialized = truncate(&sanitized.to_string(), MAX_RECORD_CHARS);
        let instruction = format!(
            "You are a cooperative's member-support assistant. Using only this loan \
             record data:\n{serialized}\n\
             Answer the member's {} question in at most two short sentences of plain \
             text. Do not invent fields that are not present.",
            info_type.as_str(),
        );

        match self.llm.complete(&LlmRequest::large(instruction)).await {
            Ok(reply) if is_usable_reply(&reply) => reply.trim().to_string(),
            Ok(reply) => {
                debug!(
                    event_name = "loan_answer.unusable_reply",
                    reply_chars = reply.len(),
                    "discarding generation output, using deterministic fallback"
                );
                render_fallback(&sanitized, info_type)
            }
            Err(error) => {
                debug!(
                    event_name = "loan_answer.generation_failed",
                    error = %error,
                    "using deterministic fallback"
                );
                render_fallback(&sanitized, info_type)
            }
        }
    }
}

fn is_usable_reply(reply: &str) -> bool {
    let trimmed = reply.trim();
    !trimmed.is_empty()
        && trimmed.len() <= MAX_USABLE_REPLY_CHARS
        && !trimmed.starts_with('{')
        && !trimmed.starts_with('[')
        && !trimmed.contains("```")
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use loanline_core::loan::{InfoType, NO_ACTIVE_LOAN_MESSAGE};

    use super::LoanAnswers;
    use crate::llm::{LlmClient, LlmError, LlmRequest};

    struct CountingLlm {
        calls: AtomicUsize,
        reply: Result<&'static str, &'static str>,
    }

    impl CountingLlm {
        fn new(reply: Result<&'static str, &'static str>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply })
        }
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.map(str::to_string).map_err(|error| LlmError(error.to_string()))
        }
    }

    #[tokio::test]
    async fn empty_payload_short_circuits_without_calling_the_collaborator() {
        let llm = CountingLlm::new(Ok("should never be used"));
        let answers = LoanAnswers::new(llm.clone());

        assert_eq!(answers.render(&json!([]), InfoType::Details).await, NO_ACTIVE_LOAN_MESSAGE);
        assert_eq!(answers.render(&json!({}), InfoType::Status).await, NO_ACTIVE_LOAN_MESSAGE);
        assert_eq!(answers.render(&json!(null), InfoType::Amount).await, NO_ACTIVE_LOAN_MESSAGE);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn usable_generation_output_is_returned_verbatim() {
        let llm = CountingLlm::new(Ok("Your loan is active with 50000.00 outstanding."));
        let answers = LoanAnswers::new(llm.clone());

        let answer =
            answers.render(&json!({"status": "active", "amountDue": 50000}), InfoType::Status).await;

        assert_eq!(answer, "Your loan is active with 50000.00 outstanding.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_templates() {
        let llm = CountingLlm::new(Err("model offline"));
        let answers = LoanAnswers::new(llm);

        let answer =
            answers.render(&json!({"loanStatus": "ACTIVE"}), InfoType::Status).await;

        assert_eq!(answer, "Your loan status is ACTIVE.");
    }

    #[tokio::test]
    async fn json_shaped_output_is_rejected_in_favor_of_templates() {
        let llm = CountingLlm::new(Ok("{\"status\": \"active\"}"));
        let answers = LoanAnswers::new(llm);

        let answer = answers.render(&json!({"status": "active"}), InfoType::Status).await;

        assert_eq!(answer, "Your loan status is active.");
    }
}
