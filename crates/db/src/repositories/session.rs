use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use loanline_core::session::{PartialCredentials, PendingIntent, Session, SessionStatus};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT room_id, status, tenant, tenant_display_name, partial_email, \
             partial_employee_number, employee_number, otp_expected, auth_token, \
             pending_intent, last_error, previous_status, timed_out, verified_at, updated_at \
             FROM auth_sessions WHERE room_id = ?1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_session).transpose()
    }

    async fn replace(&self, session: Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO auth_sessions \
             (room_id, status, tenant, tenant_display_name, partial_email, \
              partial_employee_number, employee_number, otp_expected, auth_token, \
              pending_intent, last_error, previous_status, timed_out, verified_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&session.room_id)
        .bind(session.status.as_str())
        .bind(&session.tenant)
        .bind(&session.tenant_display_name)
        .bind(&session.partial_credentials.email)
        .bind(&session.partial_credentials.employee_number)
        .bind(&session.employee_number)
        .bind(&session.otp_expected)
        .bind(&session.auth_token)
        .bind(session.pending_intent.map(|intent| intent.as_str()))
        .bind(&session.last_error)
        .bind(session.previous_status.map(|status| status.as_str()))
        .bind(i64::from(session.timed_out))
        .bind(session.verified_at.map(|at| format_timestamp(&at)))
        .bind(format_timestamp(&session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM auth_sessions WHERE updated_at < ?1 AND status != ?2",
        )
        .bind(format_timestamp(&cutoff))
        .bind(SessionStatus::Authenticated.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Fixed-width RFC 3339 with a `Z` suffix so stored timestamps compare
/// correctly as text.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{raw}`: {error}")))
}

fn decode_session(row: SqliteRow) -> Result<Session, RepositoryError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<SessionStatus>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let previous_status = row
        .try_get::<Option<String>, _>("previous_status")?
        .map(|raw| raw.parse::<SessionStatus>())
        .transpose()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let pending_intent = row
        .try_get::<Option<String>, _>("pending_intent")?
        .map(|raw| {
            PendingIntent::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown pending intent `{raw}`")))
        })
        .transpose()?;

    let verified_at =
        row.try_get::<Option<String>, _>("verified_at")?.as_deref().map(parse_timestamp).transpose()?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Session {
        room_id: row.try_get("room_id")?,
        status,
        tenant: row.try_get("tenant")?,
        tenant_display_name: row.try_get("tenant_display_name")?,
        partial_credentials: PartialCredentials {
            email: row.try_get("partial_email")?,
            employee_number: row.try_get("partial_employee_number")?,
        },
        employee_number: row.try_get("employee_number")?,
        otp_expected: row.try_get("otp_expected")?,
        auth_token: row.try_get("auth_token")?,
        pending_intent,
        last_error: row.try_get("last_error")?,
        previous_status,
        timed_out: row.try_get::<i64, _>("timed_out")? != 0,
        verified_at,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
