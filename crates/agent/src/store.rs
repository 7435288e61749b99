use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use loanline_core::session::Session;
use loanline_db::repositories::{RepositoryError, SessionRepository};

/// Read result: the session plus whether a stored record backed it. A room
/// with no record (or an unreadable one) behaves as a fresh conversation.
pub struct LoadedSession {
    pub session: Session,
    pub persisted: bool,
}

/// Engine-side wrapper over the session repository. Reads never fail the
/// turn; writes stamp `updated_at` and surface their error so the handler
/// can abort before emitting a reply.
#[derive(Clone)]
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self { repository }
    }

    pub async fn load(&self, room_id: &str, now: DateTime<Utc>) -> LoadedSession {
        match self.repository.find_by_room(room_id).await {
            Ok(Some(session)) => LoadedSession { session, persisted: true },
            Ok(None) => LoadedSession { session: Session::fresh(room_id, now), persisted: false },
            Err(error) => {
                warn!(
                    event_name = "session.load_failed",
                    room_id,
                    error = %error,
                    "falling back to a fresh session"
                );
                let mut session = Session::fresh(room_id, now);
                session.last_error = Some(error.to_string());
                LoadedSession { session, persisted: false }
            }
        }
    }

    /// Full-record replace. Always stamps `updated_at = now` first; callers
    /// rely on this running before any reply is emitted.
    pub async fn store(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        session.updated_at = now;
        self.repository.replace(session.clone()).await
    }
}
