pub mod answers;
pub mod engine;
pub mod extraction;
pub mod llm;
pub mod store;
pub mod tenant_api;

pub use answers::LoanAnswers;
pub use engine::{OutboundMessage, TurnEngine};
pub use extraction::ExtractionAdapter;
pub use llm::{LlmClient, LlmError, LlmRequest, ModelSizeHint, NoopLlmClient};
pub use store::SessionStore;
pub use tenant_api::{
    AuthApiError, HttpTenantGateway, IssuedCredentials, LoanApiError, TenantGateway,
};
