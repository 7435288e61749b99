use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of the credential-verification flow for one conversation room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NeedTenant,
    NeedCredentials,
    NeedOtp,
    Authenticated,
    Failed,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown session status `{0}`")]
pub struct ParseStatusError(String);

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedTenant => "need_tenant",
            Self::NeedCredentials => "need_credentials",
            Self::NeedOtp => "need_otp",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "need_tenant" => Ok(Self::NeedTenant),
            "need_credentials" => Ok(Self::NeedCredentials),
            "need_otp" => Ok(Self::NeedOtp),
            "authenticated" => Ok(Self::Authenticated),
            "failed" => Ok(Self::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Capability stashed in the session to resume once verification completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingIntent {
    LoanLookup,
}

impl PendingIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoanLookup => "loan_lookup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "loan_lookup" => Some(Self::LoanLookup),
            _ => None,
        }
    }
}

/// Credentials collected so far during `NeedCredentials`; either field may
/// arrive on its own turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCredentials {
    pub email: Option<String>,
    pub employee_number: Option<String>,
}

impl PartialCredentials {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.employee_number.is_none()
    }

    /// Merge newly extracted fields over the stored set. A new value wins
    /// only when it is non-null.
    pub fn merge(&mut self, newer: PartialCredentials) {
        if newer.email.is_some() {
            self.email = newer.email;
        }
        if newer.employee_number.is_some() {
            self.employee_number = newer.employee_number;
        }
    }
}

const NEED_OTP_EXPIRY_MINUTES: i64 = 15;
const NEED_CREDENTIALS_EXPIRY_MINUTES: i64 = 20;
const NEED_TENANT_EXPIRY_MINUTES: i64 = 30;

/// Persisted per-room authentication state.
///
/// A room with no stored record behaves exactly like `Session::fresh`. The
/// store replaces whole records; there is no partial update.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub room_id: String,
    pub status: SessionStatus,
    pub tenant: Option<String>,
    pub tenant_display_name: Option<String>,
    pub partial_credentials: PartialCredentials,
    /// Employee number that passed upstream verification. Kept after
    /// `partial_credentials` is cleared so loan lookups can identify the
    /// member without re-prompting.
    pub employee_number: Option<String>,
    pub otp_expected: Option<String>,
    pub auth_token: Option<String>,
    pub pending_intent: Option<PendingIntent>,
    pub last_error: Option<String>,
    pub previous_status: Option<SessionStatus>,
    pub timed_out: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("room_id", &self.room_id)
            .field("status", &self.status)
            .field("tenant", &self.tenant)
            .field("tenant_display_name", &self.tenant_display_name)
            .field("partial_email", &redact_option(&self.partial_credentials.email))
            .field(
                "partial_employee_number",
                &redact_option(&self.partial_credentials.employee_number),
            )
            .field("employee_number", &redact_option(&self.employee_number))
            .field("otp_expected", &redact_option(&self.otp_expected))
            .field("auth_token", &redact_option(&self.auth_token))
            .field("pending_intent", &self.pending_intent)
            .field("last_error", &self.last_error)
            .field("previous_status", &self.previous_status)
            .field("timed_out", &self.timed_out)
            .field("verified_at", &self.verified_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

fn redact_option(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl Session {
    pub fn fresh(room_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.into(),
            status: SessionStatus::NeedTenant,
            tenant: None,
            tenant_display_name: None,
            partial_credentials: PartialCredentials::default(),
            employee_number: None,
            otp_expected: None,
            auth_token: None,
            pending_intent: None,
            last_error: None,
            previous_status: None,
            timed_out: false,
            verified_at: None,
            updated_at: now,
        }
    }

    /// Logical timeout check. Authenticated sessions never expire; other
    /// phases go stale on a phase-dependent horizon measured from the last
    /// mutation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let threshold_minutes = match self.status {
            SessionStatus::Authenticated => return false,
            SessionStatus::NeedOtp => NEED_OTP_EXPIRY_MINUTES,
            SessionStatus::NeedCredentials => NEED_CREDENTIALS_EXPIRY_MINUTES,
            SessionStatus::NeedTenant | SessionStatus::Failed => NEED_TENANT_EXPIRY_MINUTES,
        };
        now - self.updated_at > Duration::minutes(threshold_minutes)
    }

    /// Overwrite produced when the expiry policy fires: back to
    /// `NeedTenant`, secrets and partial credentials discarded, the pending
    /// intent kept so the member does not lose their original ask.
    pub fn expiry_reset(&self, now: DateTime<Utc>) -> Self {
        let mut reset = Self::fresh(self.room_id.clone(), now);
        reset.previous_status = Some(self.status);
        reset.timed_out = true;
        reset.pending_intent = self.pending_intent;
        reset
    }

    /// `Failed` is not a dead end: the next turn regenerates a fresh
    /// `NeedTenant` session, keeping only the pending intent.
    pub fn failed_recovery(&self, now: DateTime<Utc>) -> Self {
        let mut reset = Self::fresh(self.room_id.clone(), now);
        reset.previous_status = Some(SessionStatus::Failed);
        reset.pending_intent = self.pending_intent;
        reset
    }

    /// Reset used when the loan API rejects or loses the stored token:
    /// tenant, credentials, and secrets are discarded but the pending intent
    /// survives so the member is not re-asked what they wanted.
    pub fn reauth_reset(&self, now: DateTime<Utc>) -> Self {
        let mut reset = Self::fresh(self.room_id.clone(), now);
        reset.previous_status = Some(self.status);
        reset.pending_intent = self.pending_intent;
        reset
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{PartialCredentials, PendingIntent, Session, SessionStatus};

    fn aged_session(status: SessionStatus, minutes_old: i64) -> (Session, chrono::DateTime<Utc>) {
        let now = Utc::now();
        let mut session = Session::fresh("room-1", now - Duration::minutes(minutes_old));
        session.status = status;
        (session, now)
    }

    #[test]
    fn authenticated_sessions_never_expire() {
        let (session, now) = aged_session(SessionStatus::Authenticated, 60 * 24 * 30);
        assert!(!session.is_expired(now));
    }

    #[test]
    fn otp_phase_expires_after_fifteen_minutes() {
        let (session, now) = aged_session(SessionStatus::NeedOtp, 14);
        assert!(!session.is_expired(now));
        let (session, now) = aged_session(SessionStatus::NeedOtp, 16);
        assert!(session.is_expired(now));
    }

    #[test]
    fn credentials_phase_expires_after_twenty_minutes() {
        let (session, now) = aged_session(SessionStatus::NeedCredentials, 19);
        assert!(!session.is_expired(now));
        let (session, now) = aged_session(SessionStatus::NeedCredentials, 21);
        assert!(session.is_expired(now));
    }

    #[test]
    fn tenant_and_failed_phases_expire_after_thirty_minutes() {
        let (session, now) = aged_session(SessionStatus::NeedTenant, 29);
        assert!(!session.is_expired(now));
        let (session, now) = aged_session(SessionStatus::Failed, 31);
        assert!(session.is_expired(now));
    }

    #[test]
    fn expiry_reset_discards_secrets_and_keeps_pending_intent() {
        let now = Utc::now();
        let mut session = Session::fresh("room-1", now - Duration::minutes(40));
        session.status = SessionStatus::NeedOtp;
        session.tenant = Some("fusion".to_string());
        session.otp_expected = Some("482913".to_string());
        session.auth_token = Some("tok-abc".to_string());
        session.partial_credentials.email = Some("m@coop.org".to_string());
        session.pending_intent = Some(PendingIntent::LoanLookup);

        let reset = session.expiry_reset(now);

        assert_eq!(reset.status, SessionStatus::NeedTenant);
        assert_eq!(reset.previous_status, Some(SessionStatus::NeedOtp));
        assert!(reset.timed_out);
        assert!(reset.tenant.is_none());
        assert!(reset.otp_expected.is_none());
        assert!(reset.auth_token.is_none());
        assert!(reset.partial_credentials.is_empty());
        assert_eq!(reset.pending_intent, Some(PendingIntent::LoanLookup));
    }

    #[test]
    fn merge_keeps_stored_fields_when_new_extraction_is_null() {
        let mut stored = PartialCredentials {
            email: Some("m@coop.org".to_string()),
            employee_number: None,
        };
        stored.merge(PartialCredentials {
            email: None,
            employee_number: Some("4521".to_string()),
        });

        assert_eq!(stored.email.as_deref(), Some("m@coop.org"));
        assert_eq!(stored.employee_number.as_deref(), Some("4521"));
    }

    #[test]
    fn merge_prefers_newer_non_null_values() {
        let mut stored = PartialCredentials {
            email: Some("old@coop.org".to_string()),
            employee_number: Some("1111".to_string()),
        };
        stored.merge(PartialCredentials {
            email: Some("new@coop.org".to_string()),
            employee_number: None,
        });

        assert_eq!(stored.email.as_deref(), Some("new@coop.org"));
        assert_eq!(stored.employee_number.as_deref(), Some("1111"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let now = Utc::now();
        let mut session = Session::fresh("room-9", now);
        session.otp_expected = Some("771204".to_string());
        session.auth_token = Some("tok-secret".to_string());

        let rendered = format!("{session:?}");
        assert!(!rendered.contains("771204"));
        assert!(!rendered.contains("tok-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
