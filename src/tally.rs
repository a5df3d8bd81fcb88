//! Live tally computation and fan-out.
//!
//! Views are recomputed from the vote-event log on every read, so they can
//! never drift from it. Delivery to watchers is dual: accepted votes push a
//! fresh view through a per-poll broadcast channel, and a background task
//! republishes on a fixed interval so a missed push self-heals within one
//! interval. Watchers deduplicate by comparing against the last view they
//! saw, not by suppressing either producer.

use futures::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::error::PollResult;
use crate::store::PollStore;
use crate::types::{OptionView, PollId, PollView};

/// How often the defensive-polling producer republishes live views.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Compute the current aggregate view of a poll by counting vote events
/// grouped by option. Returns `None` for unknown polls.
pub async fn current_view(store: &dyn PollStore, poll_id: &PollId) -> PollResult<Option<PollView>> {
    let Some(poll) = store.poll_by_id(poll_id).await? else {
        return Ok(None);
    };
    let options = store.options_for(poll_id).await?;
    let votes = store.votes_for(poll_id).await?;

    let mut counts: HashMap<&str, u64> = HashMap::new();
    for vote in &votes {
        *counts.entry(vote.option_id.as_str()).or_insert(0) += 1;
    }

    let option_views = options
        .iter()
        .map(|option| OptionView {
            id: option.id.clone(),
            text: option.text.clone(),
            votes: counts.get(option.id.as_str()).copied().unwrap_or(0),
        })
        .collect();

    Ok(Some(PollView {
        id: poll.id,
        code: poll.code,
        question: poll.question,
        is_closed: poll.closed,
        options: option_views,
        total_votes: votes.len() as u64,
    }))
}

/// Per-poll broadcast channels carrying freshly computed views.
pub struct TallyHub {
    channels: RwLock<HashMap<PollId, broadcast::Sender<PollView>>>,
}

impl TallyHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to view updates for one poll, creating the channel on first
    /// use. A dropped receiver costs nothing; re-subscribing yields a fresh
    /// receiver with no state carried over.
    pub async fn subscribe(&self, poll_id: &PollId) -> broadcast::Receiver<PollView> {
        let mut channels = self.channels.write().await;
        channels
            .entry(poll_id.clone())
            .or_insert_with(|| broadcast::channel(32).0)
            .subscribe()
    }

    /// Push a view to current subscribers of a poll. A poll nobody watches
    /// has no channel, and send errors just mean no receivers are connected.
    pub async fn publish(&self, poll_id: &PollId, view: PollView) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(poll_id) {
            let _ = tx.send(view);
        }
    }

    /// Drop channels with no remaining receivers.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    /// Polls with at least one live subscriber.
    pub async fn live_polls(&self) -> Vec<PollId> {
        self.channels
            .read()
            .await
            .iter()
            .filter(|(_, tx)| tx.receiver_count() > 0)
            .map(|(poll_id, _)| poll_id.clone())
            .collect()
    }
}

impl Default for TallyHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the timer-driven producer: every `REFRESH_INTERVAL`, recompute and
/// republish the view of each poll that currently has subscribers.
pub fn spawn_tally_refresher(store: Arc<dyn PollStore>, hub: Arc<TallyHub>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(REFRESH_INTERVAL).await;

            hub.prune().await;
            for poll_id in hub.live_polls().await {
                match current_view(store.as_ref(), &poll_id).await {
                    Ok(Some(view)) => hub.publish(&poll_id, view).await,
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(%poll_id, %err, "tally refresh failed");
                    }
                }
            }
        }
    });
}

struct Watcher {
    rx: broadcast::Receiver<PollView>,
    store: Arc<dyn PollStore>,
    poll_id: PollId,
    initial: Option<PollView>,
    last_seen: Option<PollView>,
}

/// Lazy, unbounded stream of views for one poll: the given initial view
/// immediately, then every hub update that differs from the last view
/// delivered. A lagged receiver recomputes from the store instead of
/// failing, so slow watchers only ever skip intermediate states.
pub fn view_stream(
    store: Arc<dyn PollStore>,
    rx: broadcast::Receiver<PollView>,
    poll_id: PollId,
    initial: PollView,
) -> impl Stream<Item = PollView> + Send {
    let watcher = Watcher {
        rx,
        store,
        poll_id,
        initial: Some(initial),
        last_seen: None,
    };

    futures::stream::unfold(watcher, |mut w| async move {
        if let Some(view) = w.initial.take() {
            w.last_seen = Some(view.clone());
            return Some((view, w));
        }

        loop {
            let fresh = match w.rx.recv().await {
                Ok(view) => Some(view),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    match current_view(w.store.as_ref(), &w.poll_id).await {
                        Ok(view) => view,
                        Err(err) => {
                            tracing::error!(poll_id = %w.poll_id, %err, "view recompute failed");
                            None
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if let Some(view) = fresh {
                if w.last_seen.as_ref() != Some(&view) {
                    w.last_seen = Some(view.clone());
                    return Some((view, w));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Poll, PollOption, VoteEvent};
    use chrono::Utc;
    use futures::StreamExt;
    use ulid::Ulid;

    async fn seeded_store() -> (Arc<MemoryStore>, PollId, Vec<String>) {
        let store = Arc::new(MemoryStore::new());
        let poll = Poll {
            id: Ulid::new().to_string(),
            code: "ABCDEF".to_string(),
            question: "Best season?".to_string(),
            closed: false,
            created_at: Utc::now(),
        };
        let poll_id = poll.id.clone();
        let options: Vec<PollOption> = ["Summer", "Winter"]
            .iter()
            .map(|text| PollOption {
                id: Ulid::new().to_string(),
                poll_id: poll_id.clone(),
                text: text.to_string(),
                created_at: Utc::now(),
            })
            .collect();
        let option_ids = options.iter().map(|o| o.id.clone()).collect();
        store.insert_poll(poll, options).await.unwrap();
        (store, poll_id, option_ids)
    }

    fn vote(poll_id: &PollId, option_id: &str, voter: &str) -> VoteEvent {
        VoteEvent {
            id: Ulid::new().to_string(),
            poll_id: poll_id.clone(),
            option_id: option_id.to_string(),
            voter_fingerprint: voter.to_string(),
            network_fingerprint: format!("net-{voter}"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_current_view_counts_per_option_and_total() {
        let (store, poll_id, option_ids) = seeded_store().await;

        store
            .insert_vote(vote(&poll_id, &option_ids[0], "a"))
            .await
            .unwrap();
        store
            .insert_vote(vote(&poll_id, &option_ids[0], "b"))
            .await
            .unwrap();
        store
            .insert_vote(vote(&poll_id, &option_ids[1], "c"))
            .await
            .unwrap();

        let view = current_view(store.as_ref(), &poll_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(view.options[0].votes, 2);
        assert_eq!(view.options[1].votes, 1);
        assert_eq!(view.total_votes, 3);
        let sum: u64 = view.options.iter().map(|o| o.votes).sum();
        assert_eq!(sum, view.total_votes);
    }

    #[tokio::test]
    async fn test_current_view_unknown_poll() {
        let (store, _, _) = seeded_store().await;
        let view = current_view(store.as_ref(), &"missing".to_string())
            .await
            .unwrap();
        assert!(view.is_none());
    }

    #[tokio::test]
    async fn test_current_view_preserves_option_order() {
        let (store, poll_id, _) = seeded_store().await;
        let view = current_view(store.as_ref(), &poll_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.options[0].text, "Summer");
        assert_eq!(view.options[1].text, "Winter");
    }

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let (store, poll_id, _) = seeded_store().await;
        let hub = TallyHub::new();

        let mut rx = hub.subscribe(&poll_id).await;
        let view = current_view(store.as_ref(), &poll_id)
            .await
            .unwrap()
            .unwrap();
        hub.publish(&poll_id, view.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), view);
    }

    #[tokio::test]
    async fn test_hub_prunes_abandoned_channels() {
        let (_, poll_id, _) = seeded_store().await;
        let hub = TallyHub::new();

        let rx = hub.subscribe(&poll_id).await;
        assert_eq!(hub.live_polls().await, vec![poll_id.clone()]);

        // The query stops reporting the poll as soon as the receiver drops,
        // but the channel itself is only reclaimed by an explicit prune.
        drop(rx);
        assert!(hub.live_polls().await.is_empty());
        assert_eq!(hub.channels.read().await.len(), 1);

        hub.prune().await;
        assert!(hub.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_view_stream_yields_initial_then_deduplicated_updates() {
        let (store, poll_id, option_ids) = seeded_store().await;
        let hub = TallyHub::new();

        let rx = hub.subscribe(&poll_id).await;
        let initial = current_view(store.as_ref(), &poll_id)
            .await
            .unwrap()
            .unwrap();
        let mut stream = Box::pin(view_stream(
            store.clone() as Arc<dyn PollStore>,
            rx,
            poll_id.clone(),
            initial.clone(),
        ));

        assert_eq!(stream.next().await.unwrap(), initial);

        // Republishing an identical view must not wake the watcher.
        hub.publish(&poll_id, initial.clone()).await;

        store
            .insert_vote(vote(&poll_id, &option_ids[0], "a"))
            .await
            .unwrap();
        let updated = current_view(store.as_ref(), &poll_id)
            .await
            .unwrap()
            .unwrap();
        hub.publish(&poll_id, updated.clone()).await;

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should yield the changed view")
            .unwrap();
        assert_eq!(next, updated);
        assert_eq!(next.total_votes, 1);
    }
}
