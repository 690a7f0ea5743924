//! Ordered multiset of pending steps for one unit of work.
//!
//! Steps are stored in a `BTreeMap` keyed by [`StepKey`], so the least step is
//! always the next one to run. A `hashbrown` index keyed by step identity
//! (element + phase + action) makes scheduling idempotent.
//!
//! The queue also keeps the element clock: a monotonically increasing
//! timestamp assigned when an element is registered and when it fires. Both
//! timestamps feed the step key.
//!
//! # Invariants
//!
//! - `steps` and `index` always describe the same set of steps.
//! - Re-adding an identity that is already queued is a no-op.
//! - A popped step is removed exactly once.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use hashbrown::HashMap;
use tracing::trace;

use crate::error::{FieldError, Result};
use crate::field::FieldId;
use crate::phase::Phase;
use crate::step::{ElementId, Step, StepAction, StepIdentity, StepKey};

/// Drain state of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// No drain in progress.
    Idle,
    /// Steps are being executed.
    Draining,
}

/// Creation and firing timestamps of an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementTimes {
    /// Clock value when the element was registered.
    pub created: u64,
    /// Clock value when the element fired, if it has.
    pub fired: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
struct QueuedStep {
    element: ElementId,
    action: StepAction,
}

/// Pending steps of one unit of work.
#[derive(Debug)]
pub struct Queue {
    steps: BTreeMap<StepKey, QueuedStep>,
    index: HashMap<StepIdentity, StepKey>,
    elements: HashMap<ElementId, ElementTimes>,
    clock: u64,
    next_seq: u64,
    next_element: u64,
    state: QueueState,
}

impl Queue {
    /// Construct an empty, idle queue.
    pub fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
            index: HashMap::new(),
            elements: HashMap::new(),
            clock: 0,
            next_seq: 0,
            next_element: 0,
            state: QueueState::Idle,
        }
    }

    // ── Element clock ─────────────────────────────────────────────────────

    fn tick(&mut self) -> u64 {
        let t = self.clock;
        self.clock += 1;
        t
    }

    /// Allocate a fresh element id and register it.
    pub fn new_element(&mut self) -> ElementId {
        loop {
            let id = ElementId(self.next_element);
            self.next_element += 1;
            if !self.elements.contains_key(&id) {
                self.register_element(id);
                return id;
            }
        }
    }

    /// Register an externally allocated element. Idempotent; returns its
    /// creation timestamp.
    pub fn register_element(&mut self, element: ElementId) -> u64 {
        if let Some(times) = self.elements.get(&element) {
            return times.created;
        }
        let created = self.tick();
        self.elements.insert(element, ElementTimes { created, fired: None });
        created
    }

    /// Mark an element as fired and re-key its queued steps.
    ///
    /// The first firing wins; later calls return the original timestamp.
    pub fn fire_element(&mut self, element: ElementId) -> u64 {
        self.register_element(element);
        if let Some(fired) = self.elements.get(&element).and_then(|t| t.fired) {
            return fired;
        }
        let now = self.tick();
        if let Some(times) = self.elements.get_mut(&element) {
            times.fired = Some(now);
        }

        let affected: Vec<StepIdentity> = self
            .index
            .keys()
            .filter(|id| id.element == element)
            .copied()
            .collect();
        for identity in affected {
            if let Some(old) = self.index.get(&identity).copied() {
                let new = StepKey { fired: Some(now), ..old };
                self.rekey(identity, old, new);
            }
        }
        now
    }

    /// Timestamps of an element, if registered.
    pub fn element_times(&self, element: ElementId) -> Option<ElementTimes> {
        self.elements.get(&element).copied()
    }

    /// Whether an element has fired.
    pub fn is_fired(&self, element: ElementId) -> bool {
        self.elements
            .get(&element)
            .is_some_and(|t| t.fired.is_some())
    }

    // ── Scheduling ────────────────────────────────────────────────────────

    /// Insert a step unless an equal step (same element, phase and action) is
    /// already queued. Returns `true` if the step was inserted.
    pub fn enqueue(
        &mut self,
        element: ElementId,
        phase: Phase,
        action: StepAction,
        sort: Option<f64>,
    ) -> bool {
        let identity = StepIdentity { element, phase, action };
        if self.index.contains_key(&identity) {
            return false;
        }
        let created = self.register_element(element);
        let fired = self.elements.get(&element).and_then(|t| t.fired);
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = StepKey { phase, fired, sort, created, seq };
        self.steps.insert(key, QueuedStep { element, action });
        self.index.insert(identity, key);
        trace!(%element, %phase, seq, "step queued");
        true
    }

    /// Replace the sort value of a queued step, keeping its sequence number.
    /// Returns `false` if the step is not queued.
    pub fn update_sort(
        &mut self,
        element: ElementId,
        phase: Phase,
        action: StepAction,
        sort: Option<f64>,
    ) -> bool {
        let identity = StepIdentity { element, phase, action };
        let Some(old) = self.index.get(&identity).copied() else {
            return false;
        };
        self.rekey(identity, old, StepKey { sort, ..old });
        true
    }

    fn rekey(&mut self, identity: StepIdentity, old: StepKey, new: StepKey) {
        if let Some(step) = self.steps.remove(&old) {
            self.steps.insert(new, step);
            self.index.insert(identity, new);
        }
    }

    /// Whether an equal step is queued.
    pub fn contains(&self, element: ElementId, phase: Phase, action: StepAction) -> bool {
        self.index
            .contains_key(&StepIdentity { element, phase, action })
    }

    /// Remove a queued step. Returns `true` if it was queued.
    pub fn cancel(&mut self, element: ElementId, phase: Phase, action: StepAction) -> bool {
        match self.index.remove(&StepIdentity { element, phase, action }) {
            Some(key) => self.steps.remove(&key).is_some(),
            None => false,
        }
    }

    /// Remove every queued step that applies `field`. Returns the number removed.
    pub fn cancel_field(&mut self, field: FieldId) -> usize {
        let affected: Vec<StepIdentity> = self
            .index
            .keys()
            .filter(|id| id.action == StepAction::ApplyField(field))
            .copied()
            .collect();
        affected
            .into_iter()
            .filter(|id| self.cancel(id.element, id.phase, id.action))
            .count()
    }

    /// Remove and return the least step.
    pub fn pop(&mut self) -> Option<Step> {
        let (key, queued) = self.steps.pop_first()?;
        let step = Step::from_parts(&key, queued.element, queued.action);
        self.index.remove(&step.identity());
        Some(step)
    }

    /// The least step, without removing it.
    pub fn peek(&self) -> Option<Step> {
        self.steps
            .first_key_value()
            .map(|(key, queued)| Step::from_parts(key, queued.element, queued.action))
    }

    /// Queued steps in execution order.
    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.steps
            .iter()
            .map(|(key, queued)| Step::from_parts(key, queued.element, queued.action))
    }

    /// Number of queued steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step is queued.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Discard every queued step. Element timestamps are kept.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.index.clear();
    }

    // ── Drain state ───────────────────────────────────────────────────────

    /// Current drain state.
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Enter [`QueueState::Draining`]; fails if already draining.
    pub(crate) fn begin_drain(&mut self) -> Result<()> {
        if self.state == QueueState::Draining {
            return Err(FieldError::ReentrantDrain);
        }
        self.state = QueueState::Draining;
        Ok(())
    }

    /// Return to [`QueueState::Idle`].
    pub(crate) fn end_drain(&mut self) {
        self.state = QueueState::Idle;
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
