use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use loanline_core::session::{Session, SessionStatus};

use super::{RepositoryError, SessionRepository};

/// In-memory stand-in for the sqlite store, used by tests and the turn
/// engine's unit coverage.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(room_id).cloned())
    }

    async fn replace(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.room_id.clone(), session);
        Ok(())
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            session.status == SessionStatus::Authenticated || session.updated_at >= cutoff
        });
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use loanline_core::session::{Session, SessionStatus};

    use crate::repositories::{InMemorySessionRepository, SessionRepository};

    #[tokio::test]
    async fn in_memory_round_trip() {
        let repo = InMemorySessionRepository::default();
        let session = Session::fresh("room-1", Utc::now());

        repo.replace(session.clone()).await.expect("replace");
        let found = repo.find_by_room("room-1").await.expect("find");

        assert_eq!(found, Some(session));
    }

    #[tokio::test]
    async fn in_memory_purge_matches_sql_semantics() {
        let repo = InMemorySessionRepository::default();
        let now = Utc::now();

        let mut stale = Session::fresh("room-stale", now - Duration::hours(30));
        stale.status = SessionStatus::NeedTenant;
        repo.replace(stale).await.expect("stale");

        let mut verified = Session::fresh("room-verified", now - Duration::hours(30));
        verified.status = SessionStatus::Authenticated;
        repo.replace(verified).await.expect("verified");

        let purged = repo.purge_stale(now - Duration::hours(24)).await.expect("purge");

        assert_eq!(purged, 1);
        assert!(repo.find_by_room("room-stale").await.expect("find").is_none());
        assert!(repo.find_by_room("room-verified").await.expect("find").is_some());
    }
}
