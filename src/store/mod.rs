//! Persistence contract for polls, options, and the vote-event log.
//!
//! The store exclusively owns room-code uniqueness and the one-vote-per-voter
//! invariant. Both must be enforced atomically at insert time, returning a
//! distinguishable conflict instead of succeeding twice; everything above the
//! store treats these inserts as the single coordination point.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Poll, PollId, PollOption, VoteEvent};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a store backend.
///
/// The conflict variants are part of the contract: callers rely on telling
/// `DuplicateVoter` apart from `CodeTaken` apart from a backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room code already in use")]
    CodeTaken,

    #[error("a vote for this poll and voter already exists")]
    DuplicateVoter,

    #[error("record not found")]
    NotFound,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PollStore: Send + Sync {
    /// Persist a poll together with its full option set. Fails with
    /// `CodeTaken` when the room code is already in use; the check and the
    /// insert are a single atomic step.
    async fn insert_poll(&self, poll: Poll, options: Vec<PollOption>) -> StoreResult<()>;

    async fn poll_by_code(&self, code: &str) -> StoreResult<Option<Poll>>;

    async fn poll_by_id(&self, poll_id: &PollId) -> StoreResult<Option<Poll>>;

    /// Options for a poll, in creation order.
    async fn options_for(&self, poll_id: &PollId) -> StoreResult<Vec<PollOption>>;

    /// Append a vote event. Exactly one event may exist per
    /// (poll, voter fingerprint) pair; a conflicting insert fails with
    /// `DuplicateVoter`. Atomic insert-or-conflict, never check-then-insert.
    async fn insert_vote(&self, vote: VoteEvent) -> StoreResult<()>;

    /// The full vote-event log for a poll.
    async fn votes_for(&self, poll_id: &PollId) -> StoreResult<Vec<VoteEvent>>;

    /// Count of committed votes from one network fingerprint since `since`.
    async fn network_votes_since(
        &self,
        poll_id: &PollId,
        network_fingerprint: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Flip the closed flag. The only mutation a poll sees after creation.
    async fn close_poll(&self, poll_id: &PollId) -> StoreResult<()>;
}
