//! Time-ordered plan queue.
//!
//! Plans fire in ascending `(time, sequence)` order. The sequence number is
//! the [`PlanId`] itself: a counter assigned at schedule time, so plans for
//! the same instant fire in the order they were scheduled no matter which
//! component scheduled them.
//!
//! The queue is an ordered map rather than a binary heap so that
//! cancellation removes the entry outright instead of leaving a tombstone.
//! A resumed run rebuilds the queue with [`PlanQueue::resume`] and re-inserts
//! pending plans with [`PlanQueue::restore`], which keeps their original
//! sequence numbers.

use core::cmp::Ordering;
use std::collections::BTreeMap;

use cohort_types::PlanId;
use serde::{Deserialize, Serialize};

use crate::KernelError;

/// Caller-chosen name for a pending plan, unique among pending plans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanKey(String);

impl PlanKey {
    /// Create a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Return the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

/// A validated, non-negative, finite offset from the current time.
///
/// Data managers schedule follow-up plans from their execute phase, which
/// cannot fail. Validating the delay up front (usually in the command's
/// validate phase) is what lets that scheduling be infallible.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PlanDelay(f64);

impl PlanDelay {
    /// Fire at the current instant, after plans already queued for it.
    pub const ZERO: Self = Self(0.0);

    /// Validate a delay.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if `delay` is negative or not
    /// finite.
    pub fn new(delay: f64) -> Result<Self, KernelError> {
        if delay.is_finite() && delay >= 0.0 {
            Ok(Self(delay))
        } else {
            Err(KernelError::InvalidPlanTime {
                requested: delay,
                current: 0.0,
            })
        }
    }

    /// The delay in simulation time units.
    pub const fn value(self) -> f64 {
        self.0
    }
}

/// Check that a plan may be scheduled at `requested` when the clock reads `current`.
///
/// # Errors
///
/// Returns [`KernelError::InvalidPlanTime`] for times in the past or not finite.
pub fn check_plan_time(requested: f64, current: f64) -> Result<(), KernelError> {
    if requested.is_finite() && requested >= current {
        Ok(())
    } else {
        Err(KernelError::InvalidPlanTime { requested, current })
    }
}

#[derive(Debug, Clone, Copy)]
struct PlanOrder {
    time: f64,
    sequence: PlanId,
}

impl PartialEq for PlanOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PlanOrder {}

impl PartialOrd for PlanOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlanOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.sequence.cmp(&other.sequence))
    }
}

struct QueuedPlan<P> {
    key: Option<PlanKey>,
    payload: P,
}

/// A plan removed from the queue for firing.
#[derive(Debug)]
pub struct DuePlan<P> {
    /// The plan's handle.
    pub id: PlanId,
    /// The time it fires at; the queue clock now reads this value.
    pub time: f64,
    /// The key it was scheduled under, if any.
    pub key: Option<PlanKey>,
    /// What to run.
    pub payload: P,
}

/// Ordered queue of pending plans plus the simulation clock.
pub struct PlanQueue<P> {
    time: f64,
    next_sequence: u64,
    entries: BTreeMap<PlanOrder, QueuedPlan<P>>,
    times: BTreeMap<PlanId, f64>,
    keys: BTreeMap<PlanKey, PlanId>,
}

impl<P> core::fmt::Debug for PlanQueue<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PlanQueue")
            .field("time", &self.time)
            .field("next_sequence", &self.next_sequence)
            .field("pending", &self.entries.len())
            .finish()
    }
}

impl<P> Default for PlanQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PlanQueue<P> {
    /// An empty queue at time zero.
    pub const fn new() -> Self {
        Self::resume(0.0, PlanId::new(0))
    }

    /// An empty queue continuing a halted run.
    ///
    /// `time` is the halted run's final time and `next_id` the first plan id
    /// it had not yet issued.
    pub const fn resume(time: f64, next_id: PlanId) -> Self {
        Self {
            time: time + 0.0,
            next_sequence: next_id.value(),
            entries: BTreeMap::new(),
            times: BTreeMap::new(),
            keys: BTreeMap::new(),
        }
    }

    /// Current simulation time.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// The id the next scheduled plan will receive.
    pub const fn next_id(&self) -> PlanId {
        PlanId::new(self.next_sequence)
    }

    /// Number of pending plans.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no plans are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: PlanId) -> bool {
        self.times.contains_key(&id)
    }

    /// Firing time of a pending plan.
    pub fn time_of(&self, id: PlanId) -> Option<f64> {
        self.times.get(&id).copied()
    }

    /// The pending plan scheduled under `key`.
    pub fn plan_for_key(&self, key: &PlanKey) -> Option<PlanId> {
        self.keys.get(key).copied()
    }

    /// Pending plans in firing order.
    pub fn pending(&self) -> impl Iterator<Item = (PlanId, f64)> + '_ {
        self.entries.keys().map(|order| (order.sequence, order.time))
    }

    /// Schedule a plan at absolute time `time`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if `time` is before the
    /// current time or not finite, or [`KernelError::DuplicateIdentifier`] if
    /// `key` is already held by a pending plan.
    pub fn schedule(
        &mut self,
        time: f64,
        key: Option<PlanKey>,
        payload: P,
    ) -> Result<PlanId, KernelError> {
        check_plan_time(time, self.time)?;
        if let Some(key) = key.as_ref() {
            if self.keys.contains_key(key) {
                return Err(KernelError::duplicate("plan key", key));
            }
        }
        Ok(self.insert(time, key, payload))
    }

    /// Schedule a plan `delay` after the current time. Cannot fail.
    pub fn schedule_after(&mut self, delay: PlanDelay, payload: P) -> PlanId {
        let time = self.time + delay.value();
        self.insert(time, None, payload)
    }

    /// Re-insert a plan carried over from a halted run under its original id.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if `time` is in the past,
    /// [`KernelError::UnknownIdentifier`] if `id` was never issued by the
    /// halted run, or [`KernelError::DuplicateIdentifier`] if `id` or `key`
    /// is already pending.
    pub fn restore(
        &mut self,
        id: PlanId,
        time: f64,
        key: Option<PlanKey>,
        payload: P,
    ) -> Result<(), KernelError> {
        check_plan_time(time, self.time)?;
        if id.value() >= self.next_sequence {
            return Err(KernelError::unknown("plan", &id));
        }
        if self.times.contains_key(&id) {
            return Err(KernelError::duplicate("plan", &id));
        }
        if let Some(key) = key.as_ref() {
            if self.keys.contains_key(key) {
                return Err(KernelError::duplicate("plan key", key));
            }
        }
        self.place(id, time, key, payload);
        Ok(())
    }

    /// Cancel a pending plan. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, id: PlanId) -> bool {
        let Some(time) = self.times.remove(&id) else {
            return false;
        };
        let order = PlanOrder { time, sequence: id };
        if let Some(plan) = self.entries.remove(&order) {
            if let Some(key) = plan.key {
                self.keys.remove(&key);
            }
        }
        true
    }

    /// Cancel the pending plan scheduled under `key`, if any.
    pub fn cancel_key(&mut self, key: &PlanKey) -> bool {
        self.keys
            .get(key)
            .copied()
            .is_some_and(|id| self.cancel(id))
    }

    /// Remove the next plan if it fires no later than `limit`, advancing the
    /// clock to its time.
    pub fn pop_due(&mut self, limit: Option<f64>) -> Option<DuePlan<P>> {
        let (&order, _) = self.entries.first_key_value()?;
        if limit.is_some_and(|limit| order.time > limit) {
            return None;
        }
        let plan = self.entries.remove(&order)?;
        self.times.remove(&order.sequence);
        if let Some(key) = plan.key.as_ref() {
            self.keys.remove(key);
        }
        self.advance_to(order.time);
        Some(DuePlan {
            id: order.sequence,
            time: order.time,
            key: plan.key,
            payload: plan.payload,
        })
    }

    /// Move the clock forward to `time`. Never moves it backwards.
    pub const fn advance_to(&mut self, time: f64) {
        if time > self.time {
            self.time = time;
        }
    }

    fn insert(&mut self, time: f64, key: Option<PlanKey>, payload: P) -> PlanId {
        let id = PlanId::new(self.next_sequence);
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.place(id, time, key, payload);
        id
    }

    fn place(&mut self, id: PlanId, time: f64, key: Option<PlanKey>, payload: P) {
        // -0.0 orders before 0.0 under total_cmp; fold it so equal times tie
        // by sequence.
        let time = time + 0.0;
        if let Some(key) = key.as_ref() {
            self.keys.insert(key.clone(), id);
        }
        self.times.insert(id, time);
        self.entries.insert(
            PlanOrder { time, sequence: id },
            QueuedPlan { key, payload },
        );
    }
}
