//! Field storage: an owned numeric cell with an optional value and a pending delta.
//!
//! Fields are created and mutated through [`crate::graph::FieldGraph`]; this
//! module holds the per-field state and its read accessors.
//!
//! # Invariants
//!
//! - Reading the value of an uninitialised field is
//!   [`FieldError::UninitializedFieldAccess`].
//! - Deltas accumulate into `pending`; nothing overwrites a pending delta.
//! - A queued field has at most one step in the queue at a time.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::combinator::FieldKind;
use crate::error::{FieldError, Result};
use crate::event::ListenerList;
use crate::link::LinkId;
use crate::phase::Phase;
use crate::policy::PropagationPolicy;
use crate::step::ElementId;

// ─── FieldId ────────────────────────────────────────────────────────────────

/// Handle of a field in a [`crate::graph::FieldGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldId(pub(crate) u32);

impl FieldId {
    /// Arena index of the field.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

// ─── Update mode ────────────────────────────────────────────────────────────

/// Priority a queued field's step carries within its phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortBy {
    /// No priority; creation order decides.
    #[default]
    Unsorted,
    /// The pending delta: larger increases first.
    Pending,
    /// The value the field will hold once the pending delta is applied.
    Prospective,
}

/// Scheduling parameters of a queued field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueSpec {
    /// Phase the field's step runs in.
    pub phase: Phase,
    /// Priority rule within the phase.
    pub sort: SortBy,
}

/// How a field applies the updates it receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateMode {
    /// Apply immediately and notify outputs synchronously.
    #[default]
    Direct,
    /// Defer to a step in the owning unit of work's queue.
    Queued(QueueSpec),
}

impl UpdateMode {
    /// Queued mode in `phase` without priority.
    pub fn queued(phase: Phase) -> Self {
        UpdateMode::Queued(QueueSpec {
            phase,
            sort: SortBy::Unsorted,
        })
    }

    /// Queued mode in `phase` with a priority rule.
    pub fn queued_by(phase: Phase, sort: SortBy) -> Self {
        UpdateMode::Queued(QueueSpec { phase, sort })
    }
}

// ─── Field ──────────────────────────────────────────────────────────────────

/// A named numeric storage cell.
#[derive(Clone, Debug)]
pub struct Field {
    pub(crate) id: FieldId,
    pub(crate) label: String,
    pub(crate) owner: ElementId,
    pub(crate) kind: FieldKind,
    pub(crate) mode: UpdateMode,
    pub(crate) policy: PropagationPolicy,
    pub(crate) value: Option<f64>,
    pub(crate) pending: Option<f64>,
    pub(crate) inputs: Vec<LinkId>,
    pub(crate) outputs: Vec<LinkId>,
    pub(crate) listeners: ListenerList,
}

impl Field {
    pub(crate) fn new(
        id: FieldId,
        owner: ElementId,
        label: String,
        kind: FieldKind,
        mode: UpdateMode,
        policy: PropagationPolicy,
    ) -> Self {
        Self {
            id,
            label,
            owner,
            kind,
            mode,
            policy,
            value: None,
            pending: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            listeners: ListenerList::new(),
        }
    }

    /// Handle of this field.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Diagnostic label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Owning element.
    pub fn owner(&self) -> ElementId {
        self.owner
    }

    /// Combinator kind.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Update mode.
    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Propagation policy.
    pub fn policy(&self) -> PropagationPolicy {
        self.policy
    }

    /// Committed value; an error before the first initialisation.
    pub fn value(&self) -> Result<f64> {
        self.value.ok_or_else(|| FieldError::UninitializedFieldAccess {
            field: self.id,
            label: self.label.clone(),
        })
    }

    /// Committed value, or `None` while uninitialised.
    pub fn try_value(&self) -> Option<f64> {
        self.value
    }

    /// Accumulated delta not yet committed.
    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    /// Whether a value has ever been committed (and not cleared since).
    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    /// Connected input links, in connection order.
    pub fn inputs(&self) -> &[LinkId] {
        &self.inputs
    }

    /// Connected output links, in connection order.
    pub fn outputs(&self) -> &[LinkId] {
        &self.outputs
    }

    /// Registered listeners.
    pub fn listeners(&self) -> &[crate::event::Listener] {
        &self.listeners
    }

    /// Add `delta` to the pending update.
    pub(crate) fn accumulate(&mut self, delta: f64) {
        self.pending = Some(self.pending.unwrap_or(0.0) + delta);
    }

    /// Value plus pending delta; `None` when both are absent.
    pub(crate) fn prospective(&self) -> Option<f64> {
        match (self.value, self.pending) {
            (None, None) => None,
            (v, p) => Some(v.unwrap_or(0.0) + p.unwrap_or(0.0)),
        }
    }

    /// Sort value for this field's step under `sort`.
    pub(crate) fn sort_value(&self, sort: SortBy) -> Option<f64> {
        match sort {
            SortBy::Unsorted => None,
            SortBy::Pending => self.pending,
            SortBy::Prospective => self.prospective(),
        }
    }

    /// Drop value and pending delta.
    pub(crate) fn clear(&mut self) {
        self.value = None;
        self.pending = None;
    }
}
