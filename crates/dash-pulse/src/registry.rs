//! Channel registry with per-channel locking and lock-free rate reads.
//!
//! The registry owns one slot per monitored line. It is built once at
//! startup and its id → slot map never changes afterwards, so lookups take
//! no lock at all.
//!
//! # Threading Model
//!
//! - **Edge delivery** (any thread, possibly reentrant): `on_edge()` locks only
//!   the target channel's estimator for the timestamp read-modify-write
//! - **Consumers** (any thread): `get_rate()` and `snapshot()` read atomics and
//!   never block edge delivery
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ index: HashMap<ChannelId, usize>   (immutable)            │
//! ├──────────────────────────────────────────────────────────┤
//! │ slot 0: Mutex<PulseChannel> │ CachePadded<Published>      │
//! │ slot 1: Mutex<PulseChannel> │ CachePadded<Published>      │
//! │ ...                                                       │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::channel::{EdgeOutcome, PulseChannel};
use crossbeam_utils::CachePadded;
use dash_common::{ChannelConfig, ChannelId, DashError, DashResult, RateKind, Tick};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Values published to readers after each edge.
#[derive(Debug, Default)]
struct Published {
    /// `f64` bit pattern of the latest rate.
    rate_bits: AtomicU64,
    /// Edges delivered to this channel, including rejected ones.
    edges: AtomicU64,
    /// Edges that produced a rate.
    rates: AtomicU64,
    /// Edges discarded as degenerate intervals.
    degenerate: AtomicU64,
}

impl Published {
    #[inline]
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    #[inline]
    fn store_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
struct ChannelSlot {
    id: ChannelId,
    name: String,
    kind: RateKind,
    estimator: Mutex<PulseChannel>,
    published: CachePadded<Published>,
}

impl ChannelSlot {
    /// Lock the estimator. A panic while holding the lock cannot leave the
    /// estimator half-updated, so a poisoned lock is taken over as is.
    fn lock(&self) -> MutexGuard<'_, PulseChannel> {
        self.estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Channel identifier.
    pub id: ChannelId,
    /// Channel name.
    pub name: String,
    /// Conversion kind.
    pub kind: RateKind,
    /// Latest rate.
    pub rate: f64,
    /// Edges delivered.
    pub edges: u64,
    /// Edges that produced a rate.
    pub rates: u64,
    /// Edges discarded as degenerate intervals.
    pub degenerate: u64,
}

/// The fixed set of monitored channels.
#[derive(Debug)]
pub struct ChannelRegistry {
    slots: Vec<ChannelSlot>,
    index: HashMap<ChannelId, usize>,
}

impl ChannelRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::default()
    }

    /// Build a registry from configured channels.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::InvalidChannelConfig`] on duplicate ids or names,
    /// or on an invalid scale factor.
    pub fn from_config(channels: &[ChannelConfig]) -> DashResult<Self> {
        channels
            .iter()
            .fold(Self::builder(), |builder, ch| {
                builder.channel(&ch.name, ch.id(), ch.kind, ch.scale_factor)
            })
            .build()
    }

    fn slot(&self, id: ChannelId) -> DashResult<&ChannelSlot> {
        self.index
            .get(&id)
            .map(|&i| &self.slots[i])
            .ok_or(DashError::UnknownChannel(id))
    }

    /// Deliver one rising edge to a channel.
    ///
    /// Safe to call concurrently from several threads, including for the
    /// same channel. Edges for different channels never contend.
    ///
    /// # Errors
    ///
    /// - [`DashError::UnknownChannel`] if `id` is not registered; nothing is mutated.
    /// - [`DashError::DegenerateInterval`] if the edge repeats the previous
    ///   tick; the sample is discarded and the previous rate kept.
    pub fn on_edge(&self, id: ChannelId, timestamp: Tick) -> DashResult<EdgeOutcome> {
        let slot = self.slot(id)?;
        slot.published.edges.fetch_add(1, Ordering::Relaxed);

        let mut estimator = slot.lock();
        match estimator.on_edge(timestamp) {
            Ok(outcome @ EdgeOutcome::Rate { elapsed_us, rate }) => {
                // Published under the lock so the stored rate follows edge order.
                slot.published.store_rate(rate);
                slot.published.rates.fetch_add(1, Ordering::Relaxed);
                trace!(channel = %id, tick = %timestamp, elapsed_us, rate, "Rate updated");
                Ok(outcome)
            }
            Ok(EdgeOutcome::Primed) => {
                debug!(channel = %id, tick = %timestamp, "Channel primed");
                Ok(EdgeOutcome::Primed)
            }
            Err(e) => {
                slot.published.degenerate.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Latest rate of a channel, without blocking.
    ///
    /// Returns `0.0` until the channel has seen two edges with a non-zero
    /// interval. No staleness detection happens here; see
    /// [`RateWatchdog`](crate::watchdog::RateWatchdog).
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not registered.
    #[inline]
    pub fn get_rate(&self, id: ChannelId) -> DashResult<f64> {
        Ok(self.slot(id)?.published.rate())
    }

    /// Look up a channel identifier by name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ChannelId> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.id)
    }

    /// Tick of the most recent accepted edge on a channel.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not registered.
    pub fn last_timestamp(&self, id: ChannelId) -> DashResult<Option<Tick>> {
        Ok(self.slot(id)?.lock().last_timestamp())
    }

    /// Forget a channel's timestamps and rate.
    ///
    /// Used when an edge source restarts and its tick counter base changes,
    /// or when a channel was idle long enough for the counter to lap.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not registered.
    pub fn reset(&self, id: ChannelId) -> DashResult<()> {
        let slot = self.slot(id)?;
        let mut estimator = slot.lock();
        estimator.reset();
        slot.published.store_rate(0.0);
        debug!(channel = %id, "Channel reset");
        Ok(())
    }

    /// Snapshot of one channel.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::UnknownChannel`] if `id` is not registered.
    pub fn channel_snapshot(&self, id: ChannelId) -> DashResult<ChannelSnapshot> {
        Ok(Self::snapshot_slot(self.slot(id)?))
    }

    /// Snapshot of every channel, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.slots.iter().map(Self::snapshot_slot).collect()
    }

    fn snapshot_slot(slot: &ChannelSlot) -> ChannelSnapshot {
        ChannelSnapshot {
            id: slot.id,
            name: slot.name.clone(),
            kind: slot.kind,
            rate: slot.published.rate(),
            edges: slot.published.edges.load(Ordering::Relaxed),
            rates: slot.published.rates.load(Ordering::Relaxed),
            degenerate: slot.published.degenerate.load(Ordering::Relaxed),
        }
    }

    /// Registered channel identifiers, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    /// Check whether a channel is registered.
    #[must_use]
    pub fn contains(&self, id: ChannelId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Builder for [`ChannelRegistry`].
#[derive(Debug, Default)]
pub struct ChannelRegistryBuilder {
    channels: Vec<(String, ChannelId, RateKind, f64)>,
}

impl ChannelRegistryBuilder {
    /// Add a channel.
    #[must_use]
    pub fn channel(mut self, name: &str, id: ChannelId, kind: RateKind, scale_factor: f64) -> Self {
        self.channels.push((name.to_string(), id, kind, scale_factor));
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::InvalidChannelConfig`] on duplicate ids or names,
    /// or on an invalid scale factor.
    pub fn build(self) -> DashResult<ChannelRegistry> {
        let mut slots = Vec::with_capacity(self.channels.len());
        let mut index = HashMap::with_capacity(self.channels.len());

        for (name, id, kind, scale_factor) in self.channels {
            if slots.iter().any(|slot: &ChannelSlot| slot.name == name) {
                return Err(DashError::InvalidChannelConfig(format!(
                    "duplicate channel name '{name}'"
                )));
            }
            if index.insert(id, slots.len()).is_some() {
                return Err(DashError::InvalidChannelConfig(format!(
                    "duplicate channel id {id}"
                )));
            }

            let estimator = PulseChannel::new(id, kind, scale_factor)?;
            info!(channel = %id, %name, %kind, scale_factor, "Channel registered");
            slots.push(ChannelSlot {
                id,
                name,
                kind,
                estimator: Mutex::new(estimator),
                published: CachePadded::new(Published::default()),
            });
        }

        Ok(ChannelRegistry { slots, index })
    }
}
