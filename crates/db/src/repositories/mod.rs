use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use loanline_core::session::Session;

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable per-room session storage. The store has whole-record-replace
/// semantics only: callers read-modify-write, and concurrent writers for the
/// same room can clobber each other (an accepted limitation of the backing
/// store — there is no compare-and-swap to build on).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<Session>, RepositoryError>;

    /// Insert or fully replace the room's record.
    async fn replace(&self, session: Session) -> Result<(), RepositoryError>;

    /// Delete sessions last touched before `cutoff` that never reached
    /// `Authenticated`. Returns how many rows were removed.
    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
