use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use loanline_core::config::TenantApiConfig;

/// Shared-secret header attached to every tenant API call.
const SHARED_SECRET_HEADER: &str = "x-client-secret";

/// Secrets issued by the tenant on successful credential verification.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub otp: String,
    pub token: String,
}

impl std::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("otp", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthApiError {
    #[error("tenant rejected the supplied credentials")]
    InvalidCredentials,
    #[error("tenant has no member record for the supplied credentials")]
    NotFound,
    #[error("tenant authentication failed: {0}")]
    Unknown(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoanApiError {
    #[error("tenant no longer accepts the stored token")]
    Unauthorized,
    #[error("loan lookup failed: {0}")]
    Unknown(String),
}

/// The two calls the verification flow makes against a tenant's backend.
#[async_trait]
pub trait TenantGateway: Send + Sync {
    async fn authenticate(
        &self,
        email: &str,
        employee_number: &str,
        tenant: &str,
    ) -> Result<IssuedCredentials, AuthApiError>;

    async fn fetch_loan_info(
        &self,
        tenant: &str,
        employee_number: &str,
        token: &str,
    ) -> Result<Value, LoanApiError>;
}

pub struct HttpTenantGateway {
    client: reqwest::Client,
    base_url: String,
    shared_secret: SecretString,
}

#[derive(Serialize)]
struct AuthenticateBody<'a> {
    email: &'a str,
    employee_number: &'a str,
    tenant: &'a str,
}

impl HttpTenantGateway {
    pub fn new(config: &TenantApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            shared_secret: config.shared_secret.clone(),
        }
    }
}

#[async_trait]
impl TenantGateway for HttpTenantGateway {
    async fn authenticate(
        &self,
        email: &str,
        employee_number: &str,
        tenant: &str,
    ) -> Result<IssuedCredentials, AuthApiError> {
        let url = format!("{}/authenticate-client", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(SHARED_SECRET_HEADER, self.shared_secret.expose_secret())
            .json(&AuthenticateBody { email, employee_number, tenant })
            .send()
            .await
            .map_err(|error| AuthApiError::Unknown(error.to_string()))?;

        match response.status().as_u16() {
            200..=299 => {}
            401 => return Err(AuthApiError::InvalidCredentials),
            404 => return Err(AuthApiError::NotFound),
            other => return Err(AuthApiError::Unknown(format!("unexpected status {other}"))),
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| AuthApiError::Unknown(format!("unreadable body: {error}")))?;
        parse_issued_credentials(&body)
            .ok_or_else(|| AuthApiError::Unknown("2xx body is missing otp or token".to_string()))
    }

    async fn fetch_loan_info(
        &self,
        tenant: &str,
        employee_number: &str,
        token: &str,
    ) -> Result<Value, LoanApiError> {
        let url = format!("{}/client-loan-info", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("tenant", tenant), ("employee_number", employee_number)])
            .bearer_auth(token)
            .header(SHARED_SECRET_HEADER, self.shared_secret.expose_secret())
            .send()
            .await
            .map_err(|error| LoanApiError::Unknown(error.to_string()))?;

        match response.status().as_u16() {
            200..=299 => {}
            401 | 403 => return Err(LoanApiError::Unauthorized),
            other => {
                warn!(event_name = "tenant_api.loan_info.failed", status = other, tenant, "loan info call failed");
                return Err(LoanApiError::Unknown(format!("unexpected status {other}")));
            }
        }

        response.json().await.map_err(|error| LoanApiError::Unknown(format!("unreadable body: {error}")))
    }
}

/// The tenant promises `{data: {otp, token}}`, but the payload is validated
/// rather than trusted: either field missing makes the response malformed.
/// Numeric OTPs are stringified verbatim so leading zeros survive when the
/// tenant already quotes them.
fn parse_issued_credentials(body: &Value) -> Option<IssuedCredentials> {
    let data = body.get("data")?;
    let otp = stringify_field(data.get("otp")?)?;
    let token = stringify_field(data.get("token")?)?;
    Some(IssuedCredentials { otp, token })
}

fn stringify_field(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
