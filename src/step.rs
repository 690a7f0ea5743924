//! Deferred units of work and their total-order key.
//!
//! A [`Step`] binds an owning element, a [`Phase`] and an action. Steps are
//! ordered by [`StepKey`]:
//!
//! ```text
//! (phase, fired-at of owner, -sort value, created-at of owner, step sequence)
//! ```
//!
//! Owners that have not fired yet sort after every fired owner of the same
//! phase. Steps without a sort value sort after steps that carry one. The
//! step sequence is unique per queue, so no two keys ever compare equal.

use core::cmp::Ordering;
use core::fmt;

use crate::field::FieldId;
use crate::phase::Phase;

// ─── ElementId ──────────────────────────────────────────────────────────────

/// Opaque handle of a domain element (activation, neuron, synapse, ...).
///
/// The core never interprets it; it only uses it to group fields for teardown
/// and to look up the element's creation and firing timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// ─── StepAction ─────────────────────────────────────────────────────────────

/// What a step does when it is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepAction {
    /// Apply the pending update of a queued field.
    ApplyField(FieldId),
    /// Caller-defined task, dispatched to [`crate::thought::StepHandler`].
    Task(u32),
}

/// Identity used for idempotent scheduling: element + phase + action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StepIdentity {
    pub(crate) element: ElementId,
    pub(crate) phase: Phase,
    pub(crate) action: StepAction,
}

// ─── StepKey ────────────────────────────────────────────────────────────────

/// Composite total-order key of a queued step.
#[derive(Clone, Copy, Debug)]
pub struct StepKey {
    /// Pipeline phase.
    pub phase: Phase,
    /// Timestamp at which the owning element fired, if it has.
    pub fired: Option<u64>,
    /// Caller priority; larger values run first.
    pub sort: Option<f64>,
    /// Timestamp at which the owning element was registered.
    pub created: u64,
    /// Insertion sequence of the step itself.
    pub seq: u64,
}

/// Fired owners first, in firing order; unfired owners last.
fn cmp_fired(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Larger sort values first; absent sort values last.
fn cmp_sort(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ord for StepKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.phase
            .cmp(&other.phase)
            .then_with(|| cmp_fired(self.fired, other.fired))
            .then_with(|| cmp_sort(self.sort, other.sort))
            .then_with(|| self.created.cmp(&other.created))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for StepKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for StepKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StepKey {}

// ─── Step ───────────────────────────────────────────────────────────────────

/// A step as handed out by the queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    /// Owning element.
    pub element: ElementId,
    /// Pipeline phase.
    pub phase: Phase,
    /// Deferred action.
    pub action: StepAction,
    /// Caller priority at the time the step was handed out.
    pub sort: Option<f64>,
    /// Insertion sequence; strictly increasing per queue.
    pub seq: u64,
}

impl Step {
    pub(crate) fn from_parts(key: &StepKey, element: ElementId, action: StepAction) -> Self {
        Self {
            element,
            phase: key.phase,
            action,
            sort: key.sort,
            seq: key.seq,
        }
    }

    pub(crate) fn identity(&self) -> StepIdentity {
        StepIdentity {
            element: self.element,
            phase: self.phase,
            action: self.action,
        }
    }
}
