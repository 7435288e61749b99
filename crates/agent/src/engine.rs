use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use loanline_core::intent::{self, route, Capability, RouteInput};
use loanline_core::loan::InfoType;
use loanline_core::session::{PendingIntent, Session, SessionStatus};
use loanline_core::tenant::TenantDirectory;
use loanline_db::repositories::SessionRepository;

use crate::answers::LoanAnswers;
use crate::extraction::{is_valid_email, ExtractionAdapter};
use crate::llm::LlmClient;
use crate::store::{LoadedSession, SessionStore};
use crate::tenant_api::{AuthApiError, LoanApiError, TenantGateway};

/// One outbound message for the conversation transport callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
}

impl OutboundMessage {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

const RETRY_MESSAGE: &str =
    "Sorry — something went wrong on my side. Please send that again in a moment.";

/// Per-turn orchestrator: expiry check, intent routing, and the
/// authentication state machine. One call per inbound message; every path
/// ends in at least one user-facing message, and state is persisted before
/// any reply that claims a phase transition.
pub struct TurnEngine {
    store: SessionStore,
    directory: TenantDirectory,
    extraction: ExtractionAdapter,
    gateway: Arc<dyn TenantGateway>,
    answers: LoanAnswers,
}

impl TurnEngine {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        llm: Arc<dyn LlmClient>,
        gateway: Arc<dyn TenantGateway>,
    ) -> Self {
        Self {
            store: SessionStore::new(repository),
            directory: TenantDirectory::new(),
            extraction: ExtractionAdapter::new(llm.clone()),
            gateway,
            answers: LoanAnswers::new(llm),
        }
    }

    pub async fn handle_message(&self, room_id: &str, text: &str) -> Vec<OutboundMessage> {
        let now = Utc::now();
        let turn_id = Uuid::new_v4();

        let LoadedSession { mut session, persisted } = self.store.load(room_id, now).await;

        // Expiry runs before routing so a stale session can never leak into
        // a later phase's handler.
        if persisted && session.is_expired(now) {
            info!(
                event_name = "session.expired",
                room_id,
                turn_id = %turn_id,
                stale_status = session.status.as_str(),
                "resetting stale session before routing"
            );
            session = session.expiry_reset(now);
            if self.store.store(&mut session, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
        }

        let status = persisted.then_some(session.status);
        let capability = route(&RouteInput { message: text, status });
        debug!(
            event_name = "turn.routed",
            room_id,
            turn_id = %turn_id,
            capability = ?capability,
            status = ?status,
            "capability claimed the message"
        );

        // An authenticated room with a stashed intent resumes it no matter
        // what the member wrote, unless reset or OTP entry claimed the turn.
        if persisted
            && session.status == SessionStatus::Authenticated
            && session.pending_intent.is_some()
            && matches!(
                capability,
                Capability::Authenticate | Capability::LoanLookup | Capability::SmallTalk
            )
        {
            let info_type = self.extraction.classify_loan_query(text).await;
            let mut messages =
                vec![OutboundMessage::new("One moment while I pull up your loan details…")];
            messages.extend(self.run_loan_query(session, info_type, now).await);
            return messages;
        }

        match capability {
            Capability::Reset => self.handle_reset(session, now).await,
            Capability::VerifyOtp => self.handle_verify_otp(session, text, now).await,
            Capability::Authenticate => {
                self.handle_authenticate(session, text, now, persisted).await
            }
            Capability::LoanLookup => self.handle_loan_lookup(session, text, now, persisted).await,
            Capability::SmallTalk => self.handle_small_talk(session, text, now, persisted).await,
        }
    }

    async fn handle_reset(&self, session: Session, now: DateTime<Utc>) -> Vec<OutboundMessage> {
        let mut fresh = Session::fresh(session.room_id.clone(), now);
        if self.store.store(&mut fresh, now).await.is_err() {
            return vec![OutboundMessage::new(RETRY_MESSAGE)];
        }
        vec![OutboundMessage::new(format!(
            "No problem — let's start from the beginning. {}",
            self.tenant_prompt()
        ))]
    }

    async fn handle_verify_otp(
        &self,
        mut session: Session,
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<OutboundMessage> {
        let Some(expected) = session.otp_expected.clone() else {
            // Invariant breach: NeedOtp without a stored code. Restart the
            // flow rather than leaving the member stuck.
            warn!(
                event_name = "otp.missing_expected_code",
                room_id = %session.room_id,
                "session reached NeedOtp without a stored code"
            );
            let mut reset = session.reauth_reset(now);
            if self.store.store(&mut reset, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
            return vec![OutboundMessage::new(format!(
                "Something went out of sync on my side, so let's restart your verification. {}",
                self.tenant_prompt()
            ))];
        };

        // Exact string comparison: "007" is not "7".
        if text.trim() != expected {
            if self.store.store(&mut session, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
            return vec![OutboundMessage::new(
                "That code doesn't match. Please re-enter the 6-digit code we sent you.",
            )];
        }

        session.status = SessionStatus::Authenticated;
        session.verified_at = Some(now);
        session.otp_expected = None;
        let pending = session.pending_intent;
        if self.store.store(&mut session, now).await.is_err() {
            return vec![OutboundMessage::new(RETRY_MESSAGE)];
        }

        match pending {
            Some(PendingIntent::LoanLookup) => {
                let mut messages = vec![OutboundMessage::new(
                    "You're verified! One moment while I pull up your loan details…",
                )];
                messages.extend(self.run_loan_query(session, InfoType::Details, now).await);
                messages
            }
            None => vec![OutboundMessage::new("You're verified! How can I help you today?")],
        }
    }

    async fn handle_authenticate(
        &self,
        session: Session,
        text: &str,
        now: DateTime<Utc>,
        persisted: bool,
    ) -> Vec<OutboundMessage> {
        if persisted && session.status == SessionStatus::Failed {
            let mut recovered = session.failed_recovery(now);
            if self.store.store(&mut recovered, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
            return vec![OutboundMessage::new(format!(
                "Let's try that again from the top. {}",
                self.tenant_prompt()
            ))];
        }

        match session.status {
            SessionStatus::NeedTenant => self.handle_need_tenant(session, text, now).await,
            SessionStatus::NeedCredentials => {
                self.handle_need_credentials(session, text, now).await
            }
            SessionStatus::NeedOtp => {
                let mut session = session;
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(
                    "Please enter the 6-digit code we sent you — digits only.",
                )]
            }
            SessionStatus::Authenticated => {
                let mut session = session;
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(
                    "You're already verified. Ask me about your loan any time.",
                )]
            }
            // Unreached: Failed is handled above, and fresh sessions start
            // at NeedTenant.
            SessionStatus::Failed => self.handle_need_tenant(session, text, now).await,
        }
    }

    async fn handle_need_tenant(
        &self,
        mut session: Session,
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<OutboundMessage> {
        match self.resolve_tenant(text).await {
            Some((tenant_id, display_name)) => {
                session.tenant = Some(tenant_id);
                session.tenant_display_name = Some(display_name.clone());
                session.status = SessionStatus::NeedCredentials;
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(format!(
                    "Great — {display_name}. To verify your identity, please share your \
                     registered email address and your employee number."
                ))]
            }
            None => {
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(format!(
                    "I couldn't match that to a cooperative I work with. {}",
                    self.tenant_prompt()
                ))]
            }
        }
    }

    /// Resolver first, collaborator second. The collaborator only ever
    /// returns a name from the candidate list, which is re-resolved so the
    /// stored id always comes from the directory.
    async fn resolve_tenant(&self, text: &str) -> Option<(String, String)> {
        if let Some(tenant_id) = self.directory.resolve(text) {
            return Some((tenant_id.to_string(), self.display_for(tenant_id, text)));
        }

        let candidates = self.directory.candidate_names();
        match self.extraction.extract_tenant(text, &candidates).await {
            Ok(Some(candidate)) => self
                .directory
                .resolve(&candidate)
                .map(|tenant_id| (tenant_id.to_string(), self.display_for(tenant_id, &candidate))),
            Ok(None) => None,
            Err(error) => {
                warn!(
                    event_name = "tenant.extraction_failed",
                    error = %error,
                    "collaborator could not extract a tenant"
                );
                None
            }
        }
    }

    fn display_for(&self, tenant_id: &str, fallback: &str) -> String {
        self.directory
            .display_name(tenant_id)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.trim().to_string())
    }

    async fn handle_need_credentials(
        &self,
        mut session: Session,
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<OutboundMessage> {
        let extracted = match self.extraction.extract_credentials(text).await {
            Ok(extracted) => extracted,
            Err(error) => {
                warn!(
                    event_name = "credentials.extraction_failed",
                    room_id = %session.room_id,
                    error = %error,
                    "could not extract credentials"
                );
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                return vec![OutboundMessage::new(
                    "I didn't catch those details. Please send your registered email address \
                     and your employee number.",
                )];
            }
        };

        session.partial_credentials.merge(extracted);

        // Never call the tenant API while a required field is missing or
        // malformed; re-prompt for the specific gap instead.
        let collected = match (
            session.partial_credentials.email.clone(),
            session.partial_credentials.employee_number.clone(),
        ) {
            (None, None) => Err(
                "I still need your registered email address and your employee number."
                    .to_string(),
            ),
            (None, Some(_)) => Err("I still need your registered email address.".to_string()),
            (Some(email), _) if !is_valid_email(&email) => Err(
                "That email address doesn't look quite right — could you re-send it \
                 (like name@example.com)?"
                    .to_string(),
            ),
            (Some(_), None) => Err("Thanks — I still need your employee number.".to_string()),
            (Some(email), Some(employee_number)) => Ok((email, employee_number)),
        };
        let (email, employee_number) = match collected {
            Ok(pair) => pair,
            Err(prompt) => {
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                return vec![OutboundMessage::new(prompt)];
            }
        };
        let Some(tenant) = session.tenant.clone() else {
            // Invariant breach: credentials phase without a tenant.
            warn!(
                event_name = "credentials.missing_tenant",
                room_id = %session.room_id,
                "session reached NeedCredentials without a tenant"
            );
            let mut reset = session.reauth_reset(now);
            if self.store.store(&mut reset, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
            return vec![OutboundMessage::new(format!(
                "Let's restart your verification. {}",
                self.tenant_prompt()
            ))];
        };

        match self.gateway.authenticate(&email, &employee_number, &tenant).await {
            Ok(issued) => {
                session.status = SessionStatus::NeedOtp;
                session.otp_expected = Some(issued.otp);
                session.auth_token = Some(issued.token);
                session.employee_number = Some(employee_number);
                session.partial_credentials = Default::default();
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(
                    "Thanks! We've sent a one-time code to your registered contact. Please \
                     enter the 6-digit code here.",
                )]
            }
            Err(error) => {
                // The member may retry; nothing already collected is
                // discarded.
                let display = session
                    .tenant_display_name
                    .clone()
                    .unwrap_or_else(|| "your cooperative".to_string());
                session.last_error = Some(error.to_string());
                let apology = match error {
                    AuthApiError::InvalidCredentials => {
                        "Those details didn't match your cooperative's records. Please \
                         double-check your email and employee number and try again."
                            .to_string()
                    }
                    AuthApiError::NotFound => format!(
                        "I couldn't find a member record with those details at {display}. \
                         Please re-check them and try again."
                    ),
                    AuthApiError::Unknown(_) => {
                        "Sorry — the verification service had a problem just now. Please try \
                         again in a moment."
                            .to_string()
                    }
                };
                if self.store.store(&mut session, now).await.is_err() {
                    return vec![OutboundMessage::new(RETRY_MESSAGE)];
                }
                vec![OutboundMessage::new(apology)]
            }
        }
    }

    async fn handle_loan_lookup(
        &self,
        mut session: Session,
        text: &str,
        now: DateTime<Utc>,
        persisted: bool,
    ) -> Vec<OutboundMessage> {
        if persisted && session.status == SessionStatus::Authenticated {
            let info_type = self.extraction.classify_loan_query(text).await;
            let mut messages = vec![OutboundMessage::new("Let me check that for you…")];
            messages.extend(self.run_loan_query(session, info_type, now).await);
            return messages;
        }

        // Loan questions from unverified rooms redirect into the
        // verification flow, remembering what the member asked for and
        // resuming whichever step the room is at.
        if persisted && session.status == SessionStatus::Failed {
            let mut recovered = session.failed_recovery(now);
            recovered.pending_intent = Some(PendingIntent::LoanLookup);
            if self.store.store(&mut recovered, now).await.is_err() {
                return vec![OutboundMessage::new(RETRY_MESSAGE)];
            }
            return vec![OutboundMessage::new(format!(
                "I can pull up your loan details right after a quick identity check. {}",
                self.tenant_prompt()
            ))];
        }

        session.pending_intent = Some(PendingIntent::LoanLookup);
        let prompt = match session.status {
            SessionStatus::NeedCredentials => {
                "I can pull up your loan details right after verification. Please share your \
                 registered email address and your employee number."
                    .to_string()
            }
            SessionStatus::NeedOtp => {
                "I can pull up your loan details right after verification. Please enter the \
                 6-digit code we sent you."
                    .to_string()
            }
            _ => format!(
                "I can pull up your loan details right after a quick identity check. {}",
                self.tenant_prompt()
            ),
        };
        if self.store.store(&mut session, now).await.is_err() {
            return vec![OutboundMessage::new(RETRY_MESSAGE)];
        }
        vec![OutboundMessage::new(prompt)]
    }

    async fn run_loan_query(
        &self,
        mut session: Session,
        info_type: InfoType,
        now: DateTime<Utc>,
    ) -> Vec<OutboundMessage> {
        let (Some(tenant), Some(employee_number), Some(token)) = (
            session.tenant.clone(),
            session.employee_number.clone(),
            session.auth_token.clone(),
        ) else {
            warn!(
                event_name = "loan.missing_identity",
                room_id = %session.room_id,
                "authenticated session is missing tenant, employee number, or token"
            );
            return self.reset_for_reauth(session, now, None).await;
        };

        match self.gateway.fetch_loan_info(&tenant, &employee_number, &token).await {
            Ok(record) => {
                let answer = self.answers.render(&record, info_type).await;
                session.pending_intent = None;
                if let Err(error) = self.store.store(&mut session, now).await {
                    // The answer still goes out; an uncleared intent only
                    // means the lookup may run once more next turn.
                    warn!(
                        event_name = "loan.pending_clear_failed",
                        room_id = %session.room_id,
                        error = %error,
                        "could not persist cleared pending intent"
                    );
                }
                vec![OutboundMessage::new(answer)]
            }
            Err(LoanApiError::Unauthorized) => {
                self.reset_for_reauth(
                    session,
                    now,
                    Some(
                        "Your verification has expired, so let's re-verify quickly."
                            .to_string(),
                    ),
                )
                .await
            }
            Err(LoanApiError::Unknown(detail)) => {
                warn!(
                    event_name = "loan.upstream_failed",
                    room_id = %session.room_id,
                    detail,
                    "loan service failed"
                );
                self.reset_for_reauth(
                    session,
                    now,
                    Some(
                        "Sorry — I couldn't reach your cooperative's loan service just now."
                            .to_string(),
                    ),
                )
                .await
            }
        }
    }

    /// The stored token is assumed invalid: discard tenant, credentials, and
    /// secrets, keep the loan ask pending, and send the member back to the
    /// start of the flow.
    async fn reset_for_reauth(
        &self,
        session: Session,
        now: DateTime<Utc>,
        preamble: Option<String>,
    ) -> Vec<OutboundMessage> {
        let mut reset = session.reauth_reset(now);
        reset.pending_intent = Some(PendingIntent::LoanLookup);
        if self.store.store(&mut reset, now).await.is_err() {
            return vec![OutboundMessage::new(RETRY_MESSAGE)];
        }
        let preamble = preamble
            .unwrap_or_else(|| "Something went out of sync, so let's re-verify.".to_string());
        vec![OutboundMessage::new(format!("{preamble} {}", self.tenant_prompt()))]
    }

    async fn handle_small_talk(
        &self,
        mut session: Session,
        text: &str,
        now: DateTime<Utc>,
        persisted: bool,
    ) -> Vec<OutboundMessage> {
        let reply = if intent::is_pure_digits(text) {
            "If that's a verification code, I'll ask for it once we reach that step. Say \
             'verify' to start identity verification, or ask me about your loan."
        } else if persisted && session.status == SessionStatus::Authenticated {
            "How can I help? You can ask about your loan status, amount, or payments."
        } else {
            "I can check your loan details once you're verified — ask about your loan, or \
             say 'verify' to begin."
        };

        // Small talk never creates a record for an unseen room; it only
        // refreshes existing ones.
        if persisted && self.store.store(&mut session, now).await.is_err() {
            return vec![OutboundMessage::new(RETRY_MESSAGE)];
        }
        vec![OutboundMessage::new(reply)]
    }

    fn tenant_prompt(&self) -> String {
        format!(
            "Which cooperative are you with? For example: {}.",
            self.directory.example_names(5).join(", ")
        )
    }
}
