use crate::store::StoreError;

/// Result type for poll operations
pub type PollResult<T> = Result<T, PollError>;

/// Errors surfaced by the poll core.
///
/// Validation and conflict variants are expected, user-facing outcomes and
/// carry a stable machine-readable reason code. `Storage` is unexpected and
/// is surfaced to callers as a generic server failure while the underlying
/// cause is logged for operators.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("{0}")]
    Validation(String),

    #[error("Poll not found.")]
    NotFound,

    #[error("This poll is closed.")]
    PollClosed,

    #[error("Selected option does not belong to this poll.")]
    InvalidOption,

    #[error("Too many votes from this network. Try again shortly.")]
    RateLimited { retry_after_seconds: u64 },

    #[error("A vote from this network was just recorded. Please wait briefly.")]
    DuplicateNetworkRecent,

    #[error("This device already voted.")]
    AlreadyVoted,

    #[error("Could not generate unique room code. Please retry.")]
    RoomCodeCollision,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl PollError {
    /// Stable reason code, distinguishable for every rejection.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PollError::Validation(_) => "VALIDATION_ERROR",
            PollError::NotFound => "NOT_FOUND",
            PollError::PollClosed => "POLL_CLOSED",
            PollError::InvalidOption => "INVALID_OPTION",
            PollError::RateLimited { .. } => "RATE_LIMITED",
            PollError::DuplicateNetworkRecent => "DUPLICATE_NETWORK_RECENT",
            PollError::AlreadyVoted => "ALREADY_VOTED",
            PollError::RoomCodeCollision => "ROOM_CODE_COLLISION",
            PollError::Config(_) => "CONFIG_ERROR",
            PollError::Storage(_) => "SERVER_ERROR",
        }
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateVoter => PollError::AlreadyVoted,
            StoreError::CodeTaken => PollError::RoomCodeCollision,
            StoreError::NotFound => PollError::NotFound,
            StoreError::Backend(cause) => PollError::Storage(cause),
        }
    }
}
