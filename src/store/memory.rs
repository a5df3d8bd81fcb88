use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{PollStore, StoreError, StoreResult};
use crate::types::{Poll, PollId, PollOption, VoteEvent};

/// Append-only vote log plus the uniqueness index over it.
///
/// Both live under one lock so that the duplicate check and the append are a
/// single atomic step.
#[derive(Default)]
struct VoteLog {
    events: Vec<VoteEvent>,
    by_voter: HashSet<(PollId, String)>,
}

/// In-memory reference store.
///
/// Lock order is polls before options; `insert_poll` holds the polls write
/// lock across both inserts so no reader can observe a poll without its
/// options.
#[derive(Default)]
pub struct MemoryStore {
    polls: RwLock<HashMap<PollId, Poll>>,
    options: RwLock<HashMap<PollId, Vec<PollOption>>>,
    votes: RwLock<VoteLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: Poll, options: Vec<PollOption>) -> StoreResult<()> {
        let mut polls = self.polls.write().await;
        if polls.values().any(|p| p.code == poll.code) {
            return Err(StoreError::CodeTaken);
        }
        let mut all_options = self.options.write().await;
        all_options.insert(poll.id.clone(), options);
        polls.insert(poll.id.clone(), poll);
        Ok(())
    }

    async fn poll_by_code(&self, code: &str) -> StoreResult<Option<Poll>> {
        Ok(self
            .polls
            .read()
            .await
            .values()
            .find(|p| p.code == code)
            .cloned())
    }

    async fn poll_by_id(&self, poll_id: &PollId) -> StoreResult<Option<Poll>> {
        Ok(self.polls.read().await.get(poll_id).cloned())
    }

    async fn options_for(&self, poll_id: &PollId) -> StoreResult<Vec<PollOption>> {
        Ok(self
            .options
            .read()
            .await
            .get(poll_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_vote(&self, vote: VoteEvent) -> StoreResult<()> {
        let mut log = self.votes.write().await;
        let key = (vote.poll_id.clone(), vote.voter_fingerprint.clone());
        if log.by_voter.contains(&key) {
            return Err(StoreError::DuplicateVoter);
        }
        log.by_voter.insert(key);
        log.events.push(vote);
        Ok(())
    }

    async fn votes_for(&self, poll_id: &PollId) -> StoreResult<Vec<VoteEvent>> {
        Ok(self
            .votes
            .read()
            .await
            .events
            .iter()
            .filter(|v| v.poll_id == *poll_id)
            .cloned()
            .collect())
    }

    async fn network_votes_since(
        &self,
        poll_id: &PollId,
        network_fingerprint: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(self
            .votes
            .read()
            .await
            .events
            .iter()
            .filter(|v| {
                v.poll_id == *poll_id
                    && v.network_fingerprint == network_fingerprint
                    && v.created_at >= since
            })
            .count() as u64)
    }

    async fn close_poll(&self, poll_id: &PollId) -> StoreResult<()> {
        let mut polls = self.polls.write().await;
        match polls.get_mut(poll_id) {
            Some(poll) => {
                poll.closed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}
