//! Boundary operations consumed by the request-handling glue.
//!
//! Input validation happens here, before anything touches the store. The
//! service also owns identity derivation for incoming requests; the HTTP
//! layer hands over an already-resolved device token and source address and
//! never sees a fingerprint.

use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, RateGate, VoteOutcome};
use crate::codes;
use crate::error::{PollError, PollResult};
use crate::identity::IdentityConfig;
use crate::store::PollStore;
use crate::tally::{self, TallyHub};
use crate::types::{OptionId, PollView};

pub const MIN_QUESTION_CHARS: usize = 5;
pub const MAX_QUESTION_CHARS: usize = 200;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 8;
pub const MAX_OPTION_CHARS: usize = 80;

/// At most this many polls per source network within the trailing minute.
pub const CREATE_LIMIT: usize = 5;
pub const CREATE_WINDOW: Duration = Duration::from_secs(60);

/// How often the background task sweeps stale entries out of both gates.
pub const GATE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Trim and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form used for duplicate detection between option texts.
pub fn canonicalize_text(text: &str) -> String {
    normalize_text(text).to_lowercase()
}

pub struct PollService {
    store: Arc<dyn PollStore>,
    identity: IdentityConfig,
    hub: Arc<TallyHub>,
    admission: AdmissionController,
    create_gate: RateGate,
}

impl PollService {
    pub fn new(store: Arc<dyn PollStore>, identity: IdentityConfig) -> Self {
        let hub = Arc::new(TallyHub::new());
        Self {
            admission: AdmissionController::new(store.clone(), hub.clone()),
            create_gate: RateGate::new(CREATE_LIMIT, CREATE_WINDOW),
            store,
            identity,
            hub,
        }
    }

    pub fn hub(&self) -> Arc<TallyHub> {
        self.hub.clone()
    }

    /// Reclaim gate entries whose whole attempt history has aged out. Both
    /// gates otherwise retain one entry per key ever seen, and the creation
    /// gate is keyed by a caller-controlled source address.
    pub async fn sweep_gates(&self) {
        self.admission.gate().cleanup().await;
        self.create_gate.cleanup().await;
    }

    /// Validate input, allocate a room code, and persist the new poll.
    /// Returns the room code to share.
    pub async fn create_poll(
        &self,
        question: &str,
        options: &[String],
        source_address: &str,
    ) -> PollResult<String> {
        let (question, options) = validate_poll_input(question, options)?;

        if !self
            .create_gate
            .check_and_record(&format!("create:{source_address}"))
            .await
        {
            return Err(PollError::RateLimited {
                retry_after_seconds: CREATE_WINDOW.as_secs(),
            });
        }

        let poll = codes::allocate_poll(self.store.as_ref(), question, options).await?;
        tracing::info!(code = %poll.code, "poll created");
        Ok(poll.code)
    }

    /// Current view of a poll by room code. Codes compare case-insensitively.
    pub async fn get_poll(&self, code: &str) -> PollResult<PollView> {
        let poll = self
            .store
            .poll_by_code(&code.to_uppercase())
            .await?
            .ok_or(PollError::NotFound)?;
        tally::current_view(self.store.as_ref(), &poll.id)
            .await?
            .ok_or(PollError::NotFound)
    }

    /// Decide one vote attempt for the poll behind `code`.
    pub async fn vote(
        &self,
        code: &str,
        option_id: &OptionId,
        device_token: &str,
        source_address: &str,
    ) -> PollResult<VoteOutcome> {
        let poll = self
            .store
            .poll_by_code(&code.to_uppercase())
            .await?
            .ok_or(PollError::NotFound)?;

        let voter_fp = self.identity.voter_fingerprint(&poll.id, device_token);
        let network_fp = self.identity.network_fingerprint(&poll.id, source_address);

        self.admission
            .submit_vote(&poll.id, option_id, &voter_fp, &network_fp)
            .await
    }

    /// Live view stream for a poll: the current view immediately, then an
    /// update whenever the tally changes.
    pub async fn watch(&self, code: &str) -> PollResult<impl Stream<Item = PollView> + Send> {
        let poll = self
            .store
            .poll_by_code(&code.to_uppercase())
            .await?
            .ok_or(PollError::NotFound)?;

        // Subscribe before computing the initial view so no update between
        // the two can be missed.
        let rx = self.hub.subscribe(&poll.id).await;
        let initial = tally::current_view(self.store.as_ref(), &poll.id)
            .await?
            .ok_or(PollError::NotFound)?;

        Ok(tally::view_stream(
            self.store.clone(),
            rx,
            poll.id,
            initial,
        ))
    }

    /// Flip a poll from open to closed and notify watchers.
    pub async fn close_poll(&self, code: &str) -> PollResult<()> {
        let poll = self
            .store
            .poll_by_code(&code.to_uppercase())
            .await?
            .ok_or(PollError::NotFound)?;

        self.store.close_poll(&poll.id).await?;
        if let Some(view) = tally::current_view(self.store.as_ref(), &poll.id).await? {
            self.hub.publish(&poll.id, view).await;
        }
        Ok(())
    }
}

/// Spawn a background task that periodically sweeps stale entries out of the
/// service's rate gates.
pub fn spawn_gate_sweeper(service: Arc<PollService>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(GATE_SWEEP_INTERVAL).await;
            service.sweep_gates().await;
        }
    });
}

/// Boundary validation for poll creation; runs before anything touches the
/// store. Returns the trimmed question and the normalized option texts.
fn validate_poll_input(question: &str, options: &[String]) -> PollResult<(String, Vec<String>)> {
    let question = question.trim().to_string();
    if question.chars().count() < MIN_QUESTION_CHARS
        || question.chars().count() > MAX_QUESTION_CHARS
    {
        return Err(PollError::Validation(format!(
            "Question must be between {MIN_QUESTION_CHARS} and {MAX_QUESTION_CHARS} characters."
        )));
    }

    let options: Vec<String> = options
        .iter()
        .map(|entry| normalize_text(entry))
        .filter(|entry| !entry.is_empty())
        .collect();

    if options.len() < MIN_OPTIONS || options.len() > MAX_OPTIONS {
        return Err(PollError::Validation(format!(
            "Please provide between {MIN_OPTIONS} and {MAX_OPTIONS} options."
        )));
    }

    for option in &options {
        if option.chars().count() > MAX_OPTION_CHARS {
            return Err(PollError::Validation(format!(
                "Option \"{option}\" must be between 1 and {MAX_OPTION_CHARS} characters."
            )));
        }
    }

    let mut seen: Vec<(String, &String)> = Vec::new();
    for option in &options {
        let canonical = canonicalize_text(option);
        if let Some((_, original)) = seen.iter().find(|(c, _)| *c == canonical) {
            return Err(PollError::Validation(format!(
                "Duplicate option detected: \"{option}\" duplicates \"{original}\"."
            )));
        }
        seen.push((canonical, option));
    }

    Ok((question, options))
}
