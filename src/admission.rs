//! Vote admission: the accept/reject decision for a single vote attempt.
//!
//! Checks run in a fixed order and the first failure wins. The rate and
//! cooldown gates are advisory read-then-act guards that damp abusive bursts
//! before they touch the store; the (poll, voter fingerprint) uniqueness
//! constraint enforced atomically at insert time is the hard backstop, so a
//! race through the earlier gates can never produce a duplicate vote.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use ulid::Ulid;

use crate::error::{PollError, PollResult};
use crate::store::PollStore;
use crate::tally::{self, TallyHub};
use crate::types::{OptionId, PollId, PollView, VoteEvent};

/// At most this many vote attempts per network fingerprint and poll...
pub const VOTE_ATTEMPT_LIMIT: usize = 5;
/// ...within this trailing window.
pub const VOTE_ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

/// Tighter, faster-triggering guard against rapid double-submits from shared
/// networks; deliberately overlaps the coarser 60s counter.
pub const NETWORK_COOLDOWN_SECS: i64 = 45;

/// Sliding-window attempt counter.
///
/// Best-effort by design: two concurrent attempts from the same key may both
/// pass. Counts every attempt admitted past the gate, accepted or not.
pub struct RateGate {
    attempts: RwLock<HashMap<String, VecDeque<Instant>>>,
    max_events: usize,
    window: Duration,
}

impl RateGate {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            max_events,
            window,
        }
    }

    /// Record one attempt under `key`, unless the trailing window already
    /// holds the maximum. Returns false when the attempt is rejected.
    pub async fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        let events = attempts.entry(key.to_string()).or_default();

        while let Some(&oldest) = events.front() {
            if now.duration_since(oldest) >= self.window {
                events.pop_front();
            } else {
                break;
            }
        }

        if events.len() >= self.max_events {
            false
        } else {
            events.push_back(now);
            true
        }
    }

    /// Drop keys whose entire history has aged out. `check_and_record` only
    /// prunes the key it touches, so without a periodic sweep the map keeps
    /// one entry per key ever seen for the life of the process.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, events| {
            events
                .back()
                .is_some_and(|&latest| now.duration_since(latest) < self.window)
        });
    }

    /// Number of keys currently held, stale or not.
    pub async fn tracked_keys(&self) -> usize {
        self.attempts.read().await.len()
    }
}

/// Result of an accepted vote.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub option_id: OptionId,
    pub view: PollView,
}

/// The decision engine for vote attempts.
pub struct AdmissionController {
    store: Arc<dyn PollStore>,
    hub: Arc<TallyHub>,
    gate: RateGate,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn PollStore>, hub: Arc<TallyHub>) -> Self {
        Self {
            store,
            hub,
            gate: RateGate::new(VOTE_ATTEMPT_LIMIT, VOTE_ATTEMPT_WINDOW),
        }
    }

    pub(crate) fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Decide a single vote attempt. On accept, exactly one vote event is
    /// committed and the poll's watchers receive a freshly computed view.
    pub async fn submit_vote(
        &self,
        poll_id: &PollId,
        option_id: &OptionId,
        voter_fingerprint: &str,
        network_fingerprint: &str,
    ) -> PollResult<VoteOutcome> {
        // 1. Poll must exist and be open.
        let poll = self
            .store
            .poll_by_id(poll_id)
            .await?
            .ok_or(PollError::NotFound)?;
        if poll.closed {
            return Err(PollError::PollClosed);
        }

        // 2. Option must belong to this poll.
        let options = self.store.options_for(poll_id).await?;
        if !options.iter().any(|o| o.id == *option_id) {
            return Err(PollError::InvalidOption);
        }

        // 3. Coarse attempt counter per (poll, network).
        let gate_key = format!("{poll_id}:{network_fingerprint}");
        if !self.gate.check_and_record(&gate_key).await {
            return Err(PollError::RateLimited {
                retry_after_seconds: VOTE_ATTEMPT_WINDOW.as_secs(),
            });
        }

        // 4. Cooldown against committed votes from the same network.
        let since = Utc::now() - chrono::Duration::seconds(NETWORK_COOLDOWN_SECS);
        let recent = self
            .store
            .network_votes_since(poll_id, network_fingerprint, since)
            .await?;
        if recent > 0 {
            return Err(PollError::DuplicateNetworkRecent);
        }

        // 5. Atomic commit; the store's uniqueness constraint turns a
        //    concurrent duplicate into DuplicateVoter, never a second event.
        let vote = VoteEvent {
            id: Ulid::new().to_string(),
            poll_id: poll_id.clone(),
            option_id: option_id.clone(),
            voter_fingerprint: voter_fingerprint.to_string(),
            network_fingerprint: network_fingerprint.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_vote(vote).await?;

        let view = tally::current_view(self.store.as_ref(), poll_id)
            .await?
            .ok_or(PollError::NotFound)?;
        self.hub.publish(poll_id, view.clone()).await;

        Ok(VoteOutcome {
            option_id: option_id.clone(),
            view,
        })
    }
}
