use crate::session::SessionStatus;

/// Capabilities that can claim an inbound message. Exactly one is invoked
/// per turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Reset,
    VerifyOtp,
    Authenticate,
    LoanLookup,
    SmallTalk,
}

/// Routing input: the message plus the room's stored phase. `None` means no
/// record exists for the room; such a room behaves like a fresh
/// `NeedTenant` session everywhere except OTP entry.
#[derive(Clone, Copy, Debug)]
pub struct RouteInput<'a> {
    pub message: &'a str,
    pub status: Option<SessionStatus>,
}

const RESET_KEYWORDS: &[&str] = &["reset", "start over", "restart", "clear", "begin again"];

const LOAN_KEYWORDS: &[&str] = &[
    "loan",
    "balance",
    "installment",
    "repayment",
    "amount due",
    "due date",
    "eligib",
    "payment history",
];

const AUTH_KEYWORDS: &[&str] =
    &["verify", "authenticate", "log in", "login", "sign in", "identify me", "member number"];

/// The routing precedence is load-bearing and must read as one ordered rule
/// table, evaluated top-down. A rule returns `Some` to claim the message and
/// stop evaluation.
///
/// Loan keywords claim ahead of in-flow continuation: a loan question is
/// honored from any phase, with the loan capability redirecting into (or
/// resuming) verification itself.
const RULES: &[fn(&RouteInput<'_>) -> Option<Capability>] = &[
    rule_pure_digits,
    rule_reset_keyword,
    rule_loan_keywords,
    rule_in_flow_continuation,
    rule_auth_keywords,
];

pub fn route(input: &RouteInput<'_>) -> Capability {
    RULES.iter().find_map(|rule| rule(input)).unwrap_or(Capability::SmallTalk)
}

/// Rule 1: a purely numeric message belongs to OTP entry and nothing else.
/// Outside `NeedOtp` no digit-sensitive capability may claim it — a stray
/// number must never be read as a tenant name or a loan query — so it drops
/// straight to the generic fallback.
fn rule_pure_digits(input: &RouteInput<'_>) -> Option<Capability> {
    if !is_pure_digits(input.message) {
        return None;
    }
    if input.status == Some(SessionStatus::NeedOtp) {
        Some(Capability::VerifyOtp)
    } else {
        Some(Capability::SmallTalk)
    }
}

/// Rule 2: reset keywords win over all continuation logic.
fn rule_reset_keyword(input: &RouteInput<'_>) -> Option<Capability> {
    contains_any(input.message, RESET_KEYWORDS).then_some(Capability::Reset)
}

/// Rule 3: loan keywords always claim, regardless of the current phase. The
/// loan capability internally redirects unverified rooms into the
/// authentication flow, stashing the ask as a pending intent.
fn rule_loan_keywords(input: &RouteInput<'_>) -> Option<Capability> {
    contains_any(input.message, LOAN_KEYWORDS).then_some(Capability::LoanLookup)
}

/// Rule 4: any room that is not yet verified keeps routing to the flow
/// owner. A room without a record is a fresh `NeedTenant` conversation and
/// is claimed here too, so a bare "I'm from Fusion" starts the flow.
fn rule_in_flow_continuation(input: &RouteInput<'_>) -> Option<Capability> {
    match input.status {
        Some(SessionStatus::Authenticated) => None,
        Some(_) | None => Some(Capability::Authenticate),
    }
}

/// Rule 5: explicit verification requests from already-verified rooms.
fn rule_auth_keywords(input: &RouteInput<'_>) -> Option<Capability> {
    contains_any(input.message, AUTH_KEYWORDS).then_some(Capability::Authenticate)
}

/// `^\d+$` over the trimmed message.
pub fn is_pure_digits(message: &str) -> bool {
    let trimmed = message.trim();
    !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit())
}

fn contains_any(message: &str, keywords: &[&str]) -> bool {
    let lowered = message.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::{is_pure_digits, route, Capability, RouteInput};
    use crate::session::SessionStatus;

    fn routed(message: &str, status: Option<SessionStatus>) -> Capability {
        route(&RouteInput { message, status })
    }

    #[test]
    fn numeric_message_goes_to_otp_entry_only_in_otp_phase() {
        assert_eq!(routed("482913", Some(SessionStatus::NeedOtp)), Capability::VerifyOtp);
        assert_eq!(routed("  482913  ", Some(SessionStatus::NeedOtp)), Capability::VerifyOtp);
    }

    #[test]
    fn numeric_message_is_never_claimed_by_auth_or_loan() {
        for status in [
            None,
            Some(SessionStatus::NeedTenant),
            Some(SessionStatus::NeedCredentials),
            Some(SessionStatus::Authenticated),
            Some(SessionStatus::Failed),
        ] {
            assert_eq!(routed("12345", status), Capability::SmallTalk, "status {status:?}");
        }
    }

    #[test]
    fn non_digit_message_in_otp_phase_is_not_otp_entry() {
        assert_eq!(
            routed("is it 4829 or 4830?", Some(SessionStatus::NeedOtp)),
            Capability::Authenticate
        );
    }

    #[test]
    fn reset_keywords_win_over_everything_non_numeric() {
        assert_eq!(routed("please start over", Some(SessionStatus::NeedOtp)), Capability::Reset);
        assert_eq!(routed("reset", Some(SessionStatus::NeedCredentials)), Capability::Reset);
        assert_eq!(routed("restart", Some(SessionStatus::Authenticated)), Capability::Reset);
        // Even a reset that mentions the loan is still a reset.
        assert_eq!(routed("reset my loan request", None), Capability::Reset);
    }

    #[test]
    fn loan_keywords_claim_from_any_phase() {
        assert_eq!(routed("what's my loan balance?", None), Capability::LoanLookup);
        assert_eq!(
            routed("show my repayment schedule", Some(SessionStatus::Authenticated)),
            Capability::LoanLookup
        );
        // Mid-flow loan questions are honored too; the capability resumes
        // verification itself.
        assert_eq!(
            routed("when is my payment history updated?", Some(SessionStatus::NeedCredentials)),
            Capability::LoanLookup
        );
    }

    #[test]
    fn fresh_rooms_route_to_the_flow_owner() {
        assert_eq!(routed("I'm from FUSION", None), Capability::Authenticate);
        assert_eq!(routed("good morning!", None), Capability::Authenticate);
    }

    #[test]
    fn mid_flow_messages_continue_authentication() {
        assert_eq!(
            routed("my email is m@coop.org", Some(SessionStatus::NeedCredentials)),
            Capability::Authenticate
        );
        assert_eq!(
            routed("I'm with Fusion", Some(SessionStatus::NeedTenant)),
            Capability::Authenticate
        );
        assert_eq!(routed("hello?", Some(SessionStatus::Failed)), Capability::Authenticate);
    }

    #[test]
    fn ambiguous_auth_plus_loan_message_defers_to_loan_lookup() {
        assert_eq!(routed("verify me so I can see my loan", None), Capability::LoanLookup);
        assert_eq!(
            routed("log in to check my balance", Some(SessionStatus::Authenticated)),
            Capability::LoanLookup
        );
    }

    #[test]
    fn auth_keywords_claim_for_verified_rooms() {
        assert_eq!(
            routed("log in please", Some(SessionStatus::Authenticated)),
            Capability::Authenticate
        );
        assert_eq!(
            routed("verify my identity again", Some(SessionStatus::Authenticated)),
            Capability::Authenticate
        );
    }

    #[test]
    fn verified_rooms_fall_through_to_small_talk() {
        assert_eq!(routed("thanks!", Some(SessionStatus::Authenticated)), Capability::SmallTalk);
        assert_eq!(
            routed("good morning", Some(SessionStatus::Authenticated)),
            Capability::SmallTalk
        );
    }

    #[test]
    fn pure_digit_detection() {
        assert!(is_pure_digits("007"));
        assert!(is_pure_digits(" 42 "));
        assert!(!is_pure_digits("42a"));
        assert!(!is_pure_digits(""));
        assert!(!is_pure_digits("4 2"));
    }
}
