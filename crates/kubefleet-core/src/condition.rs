//! The condition ladder, §9 design note "Condition ladder as an ordered
//! enum".
//!
//! Every entity in the data model (placement, binding, policy snapshot,
//! eviction) carries an ordered list of [`Condition`]s. Rather than giving
//! each entity its own ad-hoc struct, the ladder is a single generic type
//! parameterised over a small `Copy + Eq` enum naming the condition types
//! valid for that entity, in the order status aggregation must walk them.
//! This is the same shape as `stackable-operator`'s
//! `status::condition::ClusterCondition`, generalised with a type
//! parameter instead of one fixed enum.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// `status` of a [`Condition`], mirroring the Kubernetes API convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(self) -> bool {
        matches!(self, ConditionStatus::True)
    }

    pub fn is_false(self) -> bool {
        matches!(self, ConditionStatus::False)
    }
}

/// A type naming the condition types applicable to one entity, in ladder
/// order. `Placement` and `Binding` share [`PlacementConditionType`];
/// `PolicySnapshot` and `Eviction` each define their own, smaller, ladder.
pub trait ConditionType: Copy + Eq + std::fmt::Debug + std::fmt::Display {
    /// The order status aggregation walks this entity's conditions in.
    /// Aggregation short-circuits at the first type whose aggregate is not
    /// `True` (§4.3.1 "the ladder short-circuits on the first False").
    fn ladder() -> &'static [Self];
}

/// One entry in a condition ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition<T> {
    #[serde(rename = "type")]
    pub type_: T,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
    pub last_transition_time: Option<Time>,
}

impl<T: ConditionType> Condition<T> {
    pub fn new(type_: T, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            type_,
            status,
            reason: Some(reason.into()),
            message: None,
            observed_generation: None,
            last_transition_time: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}

/// An entity's full condition ladder. Backed by a `Vec` rather than a map
/// keyed by type, since the wire format (and every example we grounded
/// this on) represents conditions as an ordered list; lookups are linear
/// but lists stay under a dozen entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet<T> {
    conditions: Vec<Condition<T>>,
}

// Implemented by hand rather than derived: `#[derive(Default)]` on a
// generic struct adds a spurious `T: Default` bound, but an empty `Vec<_>`
// needs no such bound on its element type.
impl<T> Default for ConditionSet<T> {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }
}

impl<T: ConditionType> ConditionSet<T> {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    pub fn get(&self, type_: T) -> Option<&Condition<T>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition of the same type. The
    /// `last_transition_time` is only bumped when `status` actually
    /// changes, matching the Kubernetes convention that `observedGeneration`
    /// and `reason`/`message` can churn without moving the transition
    /// clock.
    pub fn set(&mut self, mut new: Condition<T>, now: Time) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == new.type_) {
            if existing.status != new.status {
                new.last_transition_time = Some(now);
            } else {
                new.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = new;
        } else {
            new.last_transition_time = Some(now);
            self.conditions.push(new);
        }
    }

    pub fn remove(&mut self, type_: T) {
        self.conditions.retain(|c| c.type_ != type_);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition<T>> {
        self.conditions.iter()
    }

    /// Iterate the ladder types in order, pairing each with the condition
    /// present (if any). Used by status synthesis to walk the fixed order
    /// rather than whatever order conditions happen to be stored in.
    pub fn iter_ladder(&self) -> impl Iterator<Item = (T, Option<&Condition<T>>)> {
        T::ladder().iter().map(move |t| (*t, self.get(*t)))
    }
}

/// Monotone aggregation of per-cluster condition values into one top-level
/// value, §4.3.1 "Top-level aggregation" / §8 invariant 5:
///
/// - any `Unknown` → `Unknown`
/// - else any `False` → `False`
/// - else `True`
///
/// An empty iterator aggregates to `Unknown` — there is nothing to be
/// confident about yet.
pub fn aggregate(values: impl IntoIterator<Item = ConditionStatus>) -> ConditionStatus {
    let mut saw_false = false;
    let mut saw_any = false;
    for v in values {
        saw_any = true;
        match v {
            ConditionStatus::Unknown => return ConditionStatus::Unknown,
            ConditionStatus::False => saw_false = true,
            ConditionStatus::True => {}
        }
    }
    if !saw_any {
        ConditionStatus::Unknown
    } else if saw_false {
        ConditionStatus::False
    } else {
        ConditionStatus::True
    }
}

/// The placement/binding condition ladder, §9 design note.
///
/// `DiffReported` replaces `Available` as the ladder's tail when the
/// placement's apply strategy is `ReportDiff` (§3.1); callers select the
/// right tail with [`PlacementConditionType::ladder_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum PlacementConditionType {
    Scheduled,
    RolloutStarted,
    Overridden,
    WorkSynchronized,
    Applied,
    Available,
    DiffReported,
}

const STANDARD_LADDER: [PlacementConditionType; 6] = [
    PlacementConditionType::Scheduled,
    PlacementConditionType::RolloutStarted,
    PlacementConditionType::Overridden,
    PlacementConditionType::WorkSynchronized,
    PlacementConditionType::Applied,
    PlacementConditionType::Available,
];

const REPORT_DIFF_LADDER: [PlacementConditionType; 6] = [
    PlacementConditionType::Scheduled,
    PlacementConditionType::RolloutStarted,
    PlacementConditionType::Overridden,
    PlacementConditionType::WorkSynchronized,
    PlacementConditionType::Applied,
    PlacementConditionType::DiffReported,
];

impl ConditionType for PlacementConditionType {
    /// Default ladder is the `Available`-terminated one; use
    /// [`PlacementConditionType::ladder_for`] when the placement's apply
    /// strategy is known to be `ReportDiff`.
    fn ladder() -> &'static [Self] {
        &STANDARD_LADDER
    }
}

impl PlacementConditionType {
    pub fn ladder_for(report_diff: bool) -> &'static [Self] {
        if report_diff {
            &REPORT_DIFF_LADDER
        } else {
            &STANDARD_LADDER
        }
    }
}

/// The policy-snapshot condition ladder: a single `Scheduled` condition
/// written by the scheduler (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum PolicySnapshotConditionType {
    Scheduled,
}

const POLICY_SNAPSHOT_LADDER: [PolicySnapshotConditionType; 1] =
    [PolicySnapshotConditionType::Scheduled];

impl ConditionType for PolicySnapshotConditionType {
    fn ladder() -> &'static [Self] {
        &POLICY_SNAPSHOT_LADDER
    }
}

/// The eviction condition ladder (§3.6): `Valid` then `Executed`, both
/// terminal once set to a definite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum EvictionConditionType {
    Valid,
    Executed,
}

const EVICTION_LADDER: [EvictionConditionType; 2] =
    [EvictionConditionType::Valid, EvictionConditionType::Executed];

impl ConditionType for EvictionConditionType {
    fn ladder() -> &'static [Self] {
        &EVICTION_LADDER
    }
}
