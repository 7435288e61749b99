use async_trait::async_trait;
use thiserror::Error;

/// Size class of the model a request should run on. Extraction calls are
/// small and latency-sensitive; answer phrasing can afford a larger model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelSizeHint {
    Small,
    Large,
}

/// One request to the text-generation collaborator. The response is free
/// text and must be treated as untrusted output.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub instruction: String,
    pub stop: Option<String>,
    pub size_hint: ModelSizeHint,
}

impl LlmRequest {
    pub fn small(instruction: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), stop: None, size_hint: ModelSizeHint::Small }
    }

    pub fn large(instruction: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), stop: None, size_hint: ModelSizeHint::Large }
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop = Some(stop.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("text generation failed: {0}")]
pub struct LlmError(pub String);

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Stand-in used when no text-generation collaborator is wired up. Every
/// call fails, which drives callers onto their deterministic fallbacks, so
/// the flow stays usable without a model.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLlmClient;

#[async_trait]
impl LlmClient for NoopLlmClient {
    async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
        Err(LlmError("no text-generation collaborator configured".to_string()))
    }
}
