use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Fixed reply when the tenant returns no loan data at all. Neither the
/// sanitizer nor the generation collaborator runs in that case.
pub const NO_ACTIVE_LOAN_MESSAGE: &str =
    "I checked with your cooperative and there is no active loan on record for you right now.";

/// Kind of loan answer the member asked for. Unrecognized input degrades to
/// `Details` rather than failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoType {
    Status,
    Amount,
    Payment,
    Eligibility,
    History,
    Details,
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::Amount => "AMOUNT",
            Self::Payment => "PAYMENT",
            Self::Eligibility => "ELIGIBILITY",
            Self::History => "HISTORY",
            Self::Details => "DETAILS",
        }
    }

    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STATUS" => Self::Status,
            "AMOUNT" => Self::Amount,
            "PAYMENT" => Self::Payment,
            "ELIGIBILITY" => Self::Eligibility,
            "HISTORY" => Self::History,
            _ => Self::Details,
        }
    }

    /// Deterministic keyword classification of a loan query. Returns `None`
    /// when no keyword matched so the caller can consult the collaborator.
    pub fn classify(message: &str) -> Option<Self> {
        let lowered = message.to_lowercase();
        if lowered.contains("status") {
            return Some(Self::Status);
        }
        if lowered.contains("eligib") || lowered.contains("qualify") {
            return Some(Self::Eligibility);
        }
        if lowered.contains("history") || lowered.contains("statement") {
            return Some(Self::History);
        }
        if lowered.contains("payment") || lowered.contains("due") || lowered.contains("installment")
        {
            return Some(Self::Payment);
        }
        if lowered.contains("amount") || lowered.contains("balance") || lowered.contains("owe") {
            return Some(Self::Amount);
        }
        None
    }
}

/// True when the tenant payload carries no loan data worth rendering.
pub fn is_empty_loan_data(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Sanitize a schema-less tenant loan payload:
/// - null fields are dropped;
/// - keys mentioning date/time are re-emitted as canonical RFC 3339 strings
///   when their value parses as a timestamp (untouched otherwise);
/// - keys mentioning amount/payment/balance are coerced to a two-decimal
///   numeric string when their value is numeric (untouched otherwise);
/// - arrays map element-wise, nested objects recurse.
///
/// Date/time classification is checked first: `payment_date` is a date even
/// though it also mentions a payment.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(sanitize_object(map)),
        other => other.clone(),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = Map::new();
    for (key, field) in map {
        if field.is_null() {
            continue;
        }
        if field.is_object() || field.is_array() {
            sanitized.insert(key.clone(), sanitize(field));
            continue;
        }

        let lowered = key.to_lowercase();
        let value = if lowered.contains("date") || lowered.contains("time") {
            canonicalize_timestamp(field).unwrap_or_else(|| field.clone())
        } else if lowered.contains("amount")
            || lowered.contains("payment")
            || lowered.contains("balance")
        {
            coerce_two_decimal(field).unwrap_or_else(|| field.clone())
        } else {
            field.clone()
        };
        sanitized.insert(key.clone(), value);
    }
    sanitized
}

fn canonicalize_timestamp(field: &Value) -> Option<Value> {
    let raw = field.as_str()?.trim();

    let parsed: DateTime<Utc> = if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        with_offset.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        naive.and_utc()
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        return None;
    };

    Some(Value::String(parsed.to_rfc3339_opts(SecondsFormat::Secs, true)))
}

fn coerce_two_decimal(field: &Value) -> Option<Value> {
    let amount: Decimal = match field {
        Value::Number(number) => number.to_string().parse().ok()?,
        Value::String(raw) => {
            let cleaned: String =
                raw.chars().filter(|ch| !matches!(ch, '$' | ',' | ' ')).collect();
            cleaned.parse().ok()?
        }
        _ => return None,
    };

    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    Some(Value::String(rounded.to_string()))
}

/// Deterministic answer rendering used whenever the generation collaborator
/// fails or returns unusable output. Scans sanitized keys heuristically and
/// fills a fixed sentence per info type.
pub fn render_fallback(sanitized: &Value, info_type: InfoType) -> String {
    let (record, record_count) = match sanitized {
        Value::Array(items) => {
            let first = items.iter().find(|item| item.is_object());
            (first.cloned().unwrap_or(Value::Null), items.len())
        }
        other => (other.clone(), 1),
    };

    let amount = find_by_key(&record, |key| key.contains("amount"));
    let status = find_by_key(&record, |key| key.contains("status"));
    let next_payment = find_by_key(&record, |key| {
        (key.contains("next") && key.contains("payment"))
            || (key.contains("due") && key.contains("date"))
    });

    match info_type {
        InfoType::Status => match status {
            Some(status) => format!("Your loan status is {status}."),
            None => "I found your loan record, but it does not list a status.".to_string(),
        },
        InfoType::Amount => match amount {
            Some(amount) => format!("Your outstanding loan amount is {amount}."),
            None => "I found your loan record, but it does not list an amount.".to_string(),
        },
        InfoType::Payment => match (next_payment, amount) {
            (Some(next), Some(amount)) => {
                format!("Your next payment of {amount} is due {next}.")
            }
            (Some(next), None) => format!("Your next payment is due {next}."),
            (None, Some(amount)) => {
                format!("Your loan amount is {amount}; I could not find a next payment date.")
            }
            (None, None) => {
                "I found your loan record, but it does not list payment details.".to_string()
            }
        },
        InfoType::Eligibility => match status {
            Some(status) => format!(
                "Your current loan status is {status}. Your cooperative can confirm eligibility for a new loan."
            ),
            None => "Your cooperative can confirm your loan eligibility; I could not determine it from your record.".to_string(),
        },
        InfoType::History => {
            if record_count == 1 {
                "I found 1 loan record on file for you.".to_string()
            } else {
                format!("I found {record_count} loan records on file for you.")
            }
        }
        InfoType::Details => {
            let mut parts = Vec::new();
            if let Some(status) = status {
                parts.push(format!("status {status}"));
            }
            if let Some(amount) = amount {
                parts.push(format!("amount {amount}"));
            }
            if let Some(next) = next_payment {
                parts.push(format!("next payment {next}"));
            }
            if parts.is_empty() {
                format!("I found {record_count} loan record(s), but could not summarize the details.")
            } else {
                format!("Here is what I found on your loan: {}.", parts.join(", "))
            }
        }
    }
}

/// First field whose lowercase key satisfies the predicate, rendered as
/// plain text.
fn find_by_key(record: &Value, predicate: impl Fn(&str) -> bool) -> Option<String> {
    let map = record.as_object()?;
    map.iter()
        .find(|(key, value)| predicate(&key.to_lowercase()) && !value.is_null())
        .map(|(_, value)| display_value(value))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        is_empty_loan_data, render_fallback, sanitize, InfoType, NO_ACTIVE_LOAN_MESSAGE,
    };

    #[test]
    fn sanitize_coerces_amounts_and_dates() {
        let sanitized = sanitize(&json!({
            "dueDate": "2025-03-25T00:00:00Z",
            "amountDue": 50000
        }));

        assert_eq!(sanitized["amountDue"], json!("50000.00"));
        assert_eq!(sanitized["dueDate"], json!("2025-03-25T00:00:00Z"));
    }

    #[test]
    fn sanitize_drops_null_fields() {
        let sanitized = sanitize(&json!({"status": "active", "guarantor": null}));
        assert_eq!(sanitized, json!({"status": "active"}));
    }

    #[test]
    fn sanitize_leaves_unparsable_dates_untouched() {
        let sanitized = sanitize(&json!({"releaseDate": "next tuesday"}));
        assert_eq!(sanitized["releaseDate"], json!("next tuesday"));
    }

    #[test]
    fn sanitize_parses_plain_dates_to_canonical_form() {
        let sanitized = sanitize(&json!({"start_date": "2024-11-02"}));
        assert_eq!(sanitized["start_date"], json!("2024-11-02T00:00:00Z"));
    }

    #[test]
    fn sanitize_handles_money_strings_and_respects_rounding() {
        let sanitized = sanitize(&json!({
            "monthlyPayment": "$1,250.5",
            "balance": 1049.999
        }));
        assert_eq!(sanitized["monthlyPayment"], json!("1250.50"));
        assert_eq!(sanitized["balance"], json!("1050.00"));
    }

    #[test]
    fn payment_date_keys_are_dates_not_amounts() {
        let sanitized = sanitize(&json!({"payment_date": "2025-01-15"}));
        assert_eq!(sanitized["payment_date"], json!("2025-01-15T00:00:00Z"));
    }

    #[test]
    fn sanitize_maps_arrays_element_wise() {
        let sanitized = sanitize(&json!([
            {"amount": 100, "note": null},
            {"amount": "250.126"}
        ]));
        assert_eq!(sanitized, json!([{"amount": "100.00"}, {"amount": "250.13"}]));
    }

    #[test]
    fn empty_payloads_are_detected() {
        assert!(is_empty_loan_data(&json!(null)));
        assert!(is_empty_loan_data(&json!({})));
        assert!(is_empty_loan_data(&json!([])));
        assert!(!is_empty_loan_data(&json!({"status": "active"})));
        assert!(NO_ACTIVE_LOAN_MESSAGE.contains("no active loan"));
    }

    #[test]
    fn info_type_parsing_defaults_to_details() {
        assert_eq!(InfoType::parse_or_default("amount"), InfoType::Amount);
        assert_eq!(InfoType::parse_or_default(" STATUS "), InfoType::Status);
        assert_eq!(InfoType::parse_or_default("gibberish"), InfoType::Details);
    }

    #[test]
    fn classification_picks_the_most_specific_keyword() {
        assert_eq!(InfoType::classify("what's my loan status?"), Some(InfoType::Status));
        assert_eq!(InfoType::classify("when is my next payment due?"), Some(InfoType::Payment));
        assert_eq!(InfoType::classify("how much do I owe"), Some(InfoType::Amount));
        assert_eq!(InfoType::classify("am I eligible for another loan"), Some(InfoType::Eligibility));
        assert_eq!(InfoType::classify("show me my payment history"), Some(InfoType::History));
        assert_eq!(InfoType::classify("tell me about my loan"), None);
    }

    #[test]
    fn fallback_renders_status_template() {
        let sanitized = sanitize(&json!({"loanStatus": "ACTIVE", "amountDue": 50000}));
        let answer = render_fallback(&sanitized, InfoType::Status);
        assert_eq!(answer, "Your loan status is ACTIVE.");
    }

    #[test]
    fn fallback_renders_payment_template_from_due_date() {
        let sanitized = sanitize(&json!({
            "dueDate": "2025-03-25",
            "amountDue": 50000
        }));
        let answer = render_fallback(&sanitized, InfoType::Payment);
        assert_eq!(answer, "Your next payment of 50000.00 is due 2025-03-25T00:00:00Z.");
    }

    #[test]
    fn fallback_counts_history_records() {
        let sanitized = sanitize(&json!([{"amount": 1}, {"amount": 2}, {"amount": 3}]));
        assert_eq!(
            render_fallback(&sanitized, InfoType::History),
            "I found 3 loan records on file for you."
        );
    }

    #[test]
    fn fallback_details_composes_available_fields() {
        let sanitized = sanitize(&json!({"status": "active", "loanAmount": "5000"}));
        let answer = render_fallback(&sanitized, InfoType::Details);
        assert!(answer.contains("status active"));
        assert!(answer.contains("amount 5000.00"));
    }

    #[test]
    fn fallback_copes_with_fields_it_cannot_find() {
        let answer = render_fallback(&sanitize(&json!({"remarks": "ok"})), InfoType::Amount);
        assert!(answer.contains("does not list an amount"));
    }
}
