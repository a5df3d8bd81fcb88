use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type PollId = String;
pub type OptionId = String;
pub type VoteId = String;

/// A poll room. Immutable after creation except for the `closed` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    /// Short human-shareable room code, distinct from the durable id.
    pub code: String,
    pub question: String,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
}

/// One answer choice. The option set of a poll is fixed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub poll_id: PollId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A single accepted vote. Append-only; never updated or deleted.
///
/// Carries derived fingerprints only, never the raw device token or
/// source address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEvent {
    pub id: VoteId,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub voter_fingerprint: String,
    pub network_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Per-option slice of a tally view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionView {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
}

/// Aggregate view of a poll, derived from the vote-event log on demand.
/// Never stored or cached as mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: PollId,
    pub code: String,
    pub question: String,
    pub is_closed: bool,
    pub options: Vec<OptionView>,
    pub total_votes: u64,
}
