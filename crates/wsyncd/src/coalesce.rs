use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wsync_common::TransformEdit;

use crate::metrics::counters;

/// Entities tracked beyond this count are evicted oldest-idle-first on the
/// next submit. A scene with more live entities than this is already past
/// what the forwarding path is sized for.
const MAX_TRACKED_ENTITIES: usize = 10_000;

/// Destination for coalesced edits.
///
/// The live implementation forwards to the authoritative peer; tests swap
/// in a recording sink.
pub trait EditSink: Send + Sync + 'static {
    /// Deliver one edit. Returns `false` when the edit could not be
    /// delivered (no peer, queue full) so callers can count the drop.
    fn deliver(&self, edit: &TransformEdit) -> bool;
}

/// Per-entity forwarding state.
struct EntityState {
    /// Latest edit waiting out the interval, if any.
    buffered: Option<TransformEdit>,
    /// When the last edit for this entity was delivered.
    last_sent: Option<Instant>,
    /// Bumped whenever buffered state is consumed or discarded; a timer
    /// task only fires if its captured epoch still matches.
    epoch: u64,
    /// Whether a flush timer is currently scheduled for this entity.
    timer_armed: bool,
}

impl EntityState {
    fn new() -> Self {
        Self {
            buffered: None,
            last_sent: None,
            epoch: 0,
            timer_armed: false,
        }
    }
}

struct Inner {
    entities: DashMap<String, EntityState>,
    sink: Arc<dyn EditSink>,
    min_interval: Duration,
}

/// Throttles transform edits to at most one forwarded edit per entity per
/// `min_interval`, always delivering the latest value.
///
/// The first edit for an idle entity goes out immediately. Edits arriving
/// inside the interval overwrite a single buffered slot; a timer drains
/// the slot when the interval since the last delivery elapses. A burst of
/// N edits therefore yields at most two deliveries: the first edit and
/// the final value.
#[derive(Clone)]
pub struct TransformCoalescer {
    inner: Arc<Inner>,
}

impl TransformCoalescer {
    /// Creates a coalescer delivering to `sink` at most once per
    /// `min_interval` per entity.
    pub fn new(sink: Arc<dyn EditSink>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entities: DashMap::new(),
                sink,
                min_interval,
            }),
        }
    }

    /// Submits one edit for its entity.
    ///
    /// Delivers immediately when the entity is idle and the interval has
    /// elapsed (or was never started); otherwise buffers the edit and
    /// arms a trailing flush timer if one is not already armed.
    pub fn submit(&self, edit: TransformEdit) {
        counters::edits_submitted_total();
        self.prune_if_oversized();

        let now = Instant::now();
        let mut state = self
            .inner
            .entities
            .entry(edit.object_name.clone())
            .or_insert_with(EntityState::new);

        let interval_open = match state.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.inner.min_interval,
        };

        if interval_open && state.buffered.is_none() {
            if self.inner.sink.deliver(&edit) {
                counters::edits_forwarded_total("immediate");
                state.last_sent = Some(now);
            } else {
                counters::edits_dropped_total("sink");
            }
            return;
        }

        state.buffered = Some(edit);
        if !state.timer_armed {
            state.timer_armed = true;
            state.epoch += 1;
            let fire_at = match state.last_sent {
                Some(last) => last + self.inner.min_interval,
                None => now,
            };
            let key = state.key().clone();
            let epoch = state.epoch;
            drop(state);
            self.spawn_timer(key, epoch, fire_at);
        }
    }

    /// Forwards `edit` now, bypassing the interval.
    ///
    /// Used when an edit session ends: the final value must not sit in
    /// the buffer waiting out a timer. Any buffered edit for the entity
    /// is superseded and its timer cancelled.
    pub fn submit_immediate(&self, edit: TransformEdit) {
        counters::edits_submitted_total();

        let now = Instant::now();
        let mut state = self
            .inner
            .entities
            .entry(edit.object_name.clone())
            .or_insert_with(EntityState::new);

        state.buffered = None;
        state.epoch += 1;
        state.timer_armed = false;

        if self.inner.sink.deliver(&edit) {
            counters::edits_forwarded_total("immediate");
            state.last_sent = Some(now);
        } else {
            counters::edits_dropped_total("sink");
        }
    }

    /// Discards all buffered edits and cancels every armed timer.
    ///
    /// Called when the peer connection goes away: stale edits must not
    /// surface on a later connection.
    pub fn flush_all(&self) {
        let discarded = self.pending();
        self.inner.entities.clear();
        if discarded > 0 {
            counters::edits_dropped_total("flush");
            tracing::debug!(discarded, "discarded buffered edits");
        }
    }

    /// Number of entities with a buffered edit awaiting a timer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .entities
            .iter()
            .filter(|entry| entry.buffered.is_some())
            .count()
    }

    fn spawn_timer(&self, key: String, epoch: u64, fire_at: Instant) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            let Some(mut state) = inner.entities.get_mut(&key) else {
                return;
            };
            // flush_all or a newer timer invalidated this one.
            if state.epoch != epoch {
                return;
            }
            state.timer_armed = false;
            let Some(edit) = state.buffered.take() else {
                return;
            };
            state.epoch += 1;
            if inner.sink.deliver(&edit) {
                counters::edits_forwarded_total("trailing");
                state.last_sent = Some(Instant::now());
            } else {
                counters::edits_dropped_total("sink");
            }
        });
    }

    /// Evicts idle entries when the map grows past the cap. Entries with
    /// a buffered edit are kept; their timers still need to fire.
    ///
    /// Eviction drops send history, so a pruned entity's next edit is
    /// treated as a first edit and forwards immediately even inside its
    /// interval. The rate bound yields to the memory bound here.
    fn prune_if_oversized(&self) {
        if self.inner.entities.len() <= MAX_TRACKED_ENTITIES {
            return;
        }
        self.inner
            .entities
            .retain(|_, state| state.buffered.is_some() || state.timer_armed);
    }
}
