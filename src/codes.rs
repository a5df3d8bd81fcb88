//! Room code allocation.
//!
//! Codes are short enough to read out loud, so the alphabet drops characters
//! that are easy to confuse (0/O, 1/I). Uniqueness is enforced by the store
//! at insert time; allocation simply retries with a fresh code on conflict,
//! up to a fixed budget.

use chrono::Utc;
use rand::Rng;
use ulid::Ulid;

use crate::error::{PollError, PollResult};
use crate::store::{PollStore, StoreError};
use crate::types::{Poll, PollOption};

/// 32-symbol alphabet: uppercase letters and digits minus 0/O and 1/I.
pub const CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;

/// Bound on allocation retries. 32^6 codes make collisions negligible until
/// the store holds a very large number of live polls, so a small budget
/// suffices; exhausting it is reported rather than retried forever.
pub const MAX_ATTEMPTS: u32 = 8;

/// Generate a random room code, uniform per character.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Create a poll under a freshly allocated room code and persist it together
/// with its options. Returns the stored poll on success.
pub async fn allocate_poll(
    store: &dyn PollStore,
    question: String,
    option_texts: Vec<String>,
) -> PollResult<Poll> {
    allocate_poll_with(store, question, option_texts, generate_room_code).await
}

/// Allocation with an injectable code generator, so tests can script
/// collisions.
pub async fn allocate_poll_with<F>(
    store: &dyn PollStore,
    question: String,
    option_texts: Vec<String>,
    mut next_code: F,
) -> PollResult<Poll>
where
    F: FnMut() -> String,
{
    for _ in 0..MAX_ATTEMPTS {
        let now = Utc::now();
        let poll = Poll {
            id: Ulid::new().to_string(),
            code: next_code(),
            question: question.clone(),
            closed: false,
            created_at: now,
        };
        let options: Vec<PollOption> = option_texts
            .iter()
            .map(|text| PollOption {
                id: Ulid::new().to_string(),
                poll_id: poll.id.clone(),
                text: text.clone(),
                created_at: now,
            })
            .collect();

        match store.insert_poll(poll.clone(), options).await {
            Ok(()) => return Ok(poll),
            Err(StoreError::CodeTaken) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(PollError::RoomCodeCollision)
}
