//! The field graph: arena of fields and links, wiring and delta propagation.
//!
//! Fields and links live in two arenas owned by [`FieldGraph`] and are
//! addressed by [`FieldId`] and [`LinkId`]. Links are non-owning associations,
//! so feedback cycles need no shared ownership and tearing a field down needs
//! no graph-wide pointer fix-ups.
//!
//! # Propagation
//!
//! ```text
//! set_value / receive_update
//!        │
//!        ▼
//!   pending += Δ ──── queued field ──▶ Queue (one step per field)
//!        │                                    │
//!   direct field                      drain → apply_pending
//!        ▼                                    │
//!   apply_pending ◀───────────────────────────┘
//!        │  policy rejects → value untouched, Δ stays pending
//!        ▼
//!   value += Δ, listeners, then for every output target:
//!        target.kind.delta_shared(args fed by source, old, new, other inputs)
//!            → receive_update(target)
//! ```
//!
//! A source commits its new value before it notifies its outputs, so every
//! combinator reads its other arguments exactly as they were last announced.
//! All slots of one target fed by the same source move together, which keeps
//! `a · a` and `a − a` exact.
//!
//! An update that would commit a non-finite value, or whose addition would
//! cancel most of the stored magnitude, is replaced by a full recomputation of
//! the field from its inputs. Fields without inputs drop such an update.
//!
//! # Invariants
//!
//! - A link is in both adjacency lists or in neither.
//! - A fixed-arity target never has two connected inputs in the same slot.
//! - A committed value is always finite.
//! - After `disconnect_link(.., true)` returns, the target no longer includes
//!   the removed source's contribution.
//! - Graph wiring is never mutated from inside a combinator rule; rules are
//!   pure functions over values.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::combinator::{ActivationFn, BinaryFn, Comparison, FieldKind};
use crate::config::EngineConfig;
use crate::error::{FieldError, Result};
use crate::event::{EventKind, FieldEvent, Listener, ListenerId, MAX_LISTENERS};
use crate::field::{Field, FieldId, UpdateMode};
use crate::link::{FieldLink, LinkId};
use crate::policy::PropagationPolicy;
use crate::queue::Queue;
use crate::step::{ElementId, StepAction};

/// Ratio of stored magnitude to committed magnitude beyond which an
/// incremental commit is replaced by a full recomputation.
const RESYNC_RATIO: f64 = 1e6;

// ─── FieldSpec ──────────────────────────────────────────────────────────────

/// Construction parameters shared by every field constructor.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    /// Owning element.
    pub owner: ElementId,
    /// Diagnostic label.
    pub label: String,
    /// Update mode.
    pub mode: UpdateMode,
    /// Propagation policy.
    pub policy: PropagationPolicy,
}

impl FieldSpec {
    /// Direct field with the default tolerance policy.
    pub fn new(owner: ElementId, label: impl Into<String>) -> Self {
        Self {
            owner,
            label: label.into(),
            mode: UpdateMode::Direct,
            policy: PropagationPolicy::Tolerance,
        }
    }

    /// Replace the update mode.
    pub fn mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the propagation policy.
    pub fn policy(mut self, policy: PropagationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ─── FieldGraph ─────────────────────────────────────────────────────────────

/// Arena of fields and links for one unit of work.
#[derive(Debug)]
pub struct FieldGraph {
    config: EngineConfig,
    fields: Vec<Option<Field>>,
    links: Vec<Option<FieldLink>>,
    owners: HashMap<ElementId, Vec<FieldId>>,
    events: Vec<FieldEvent>,
    next_listener: u32,
    live: usize,
}

impl FieldGraph {
    /// Construct an empty graph.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fields: Vec::new(),
            links: Vec::new(),
            owners: HashMap::new(),
            events: Vec::new(),
            next_listener: 0,
            live: 0,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Arena access ──────────────────────────────────────────────────────

    /// Field by id.
    pub fn field(&self, id: FieldId) -> Result<&Field> {
        self.fields
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FieldError::UnknownField(id))
    }

    fn field_mut(&mut self, id: FieldId) -> Result<&mut Field> {
        self.fields
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(FieldError::UnknownField(id))
    }

    /// Link by id.
    pub fn link(&self, id: LinkId) -> Result<&FieldLink> {
        self.links
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FieldError::UnknownLink(id))
    }

    fn link_mut(&mut self, id: LinkId) -> Result<&mut FieldLink> {
        self.links
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(FieldError::UnknownLink(id))
    }

    /// Every field in creation order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields.iter().flatten()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the graph holds no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Record that `owner` owns `field`, for later teardown. Idempotent.
    pub fn register(&mut self, owner: ElementId, field: FieldId) {
        let owned = self.owners.entry(owner).or_default();
        if !owned.contains(&field) {
            owned.push(field);
        }
    }

    /// Fields registered to an element.
    pub fn fields_of(&self, owner: ElementId) -> &[FieldId] {
        self.owners.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Create a field without inputs and register it with its owner.
    pub fn add_field(&mut self, spec: FieldSpec, kind: FieldKind) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        let owner = spec.owner;
        debug!(field = %id, label = %spec.label, kind = kind.name(), "field created");
        self.fields.push(Some(Field::new(
            id, owner, spec.label, kind, spec.mode, spec.policy,
        )));
        self.live += 1;
        self.register(owner, id);
        id
    }

    /// Create a combinator and connect `inputs` to argument slots `0..n`,
    /// pushing every initialised input through immediately.
    pub fn combine(
        &mut self,
        spec: FieldSpec,
        kind: FieldKind,
        inputs: &[FieldId],
        queue: &mut Queue,
    ) -> Result<FieldId> {
        for &input in inputs {
            self.field(input)?;
        }
        let id = self.add_field(spec, kind);
        for (arg, &input) in inputs.iter().enumerate() {
            self.connect(input, id, arg, true, queue)?;
        }
        Ok(id)
    }

    /// Replace a field's propagation policy.
    pub fn set_policy(&mut self, id: FieldId, policy: PropagationPolicy) -> Result<()> {
        self.field_mut(id)?.policy = policy;
        Ok(())
    }

    /// Replace a field's update mode. A step already queued for the field stays
    /// queued and still applies its pending update.
    pub fn set_mode(&mut self, id: FieldId, mode: UpdateMode) -> Result<()> {
        self.field_mut(id)?.mode = mode;
        Ok(())
    }

    // ── Constructors ──────────────────────────────────────────────────────

    /// Plain input field, written with [`FieldGraph::set_value`].
    pub fn input(&mut self, owner: ElementId, label: impl Into<String>) -> FieldId {
        self.add_field(FieldSpec::new(owner, label), FieldKind::Input)
    }

    /// Running total of `inputs`.
    pub fn sum(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        inputs: &[FieldId],
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Sum, inputs, queue)
    }

    /// `Σ w · x` over `(input, weight)` pairs.
    pub fn weighted_sum(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        inputs: &[(FieldId, f64)],
        queue: &mut Queue,
    ) -> Result<FieldId> {
        let weights = inputs.iter().map(|&(_, w)| w).collect();
        let fields: Vec<FieldId> = inputs.iter().map(|&(f, _)| f).collect();
        self.combine(
            FieldSpec::new(owner, label),
            FieldKind::WeightedSum { weights },
            &fields,
            queue,
        )
    }

    /// `a − b`
    pub fn subtraction(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        a: FieldId,
        b: FieldId,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Subtraction, &[a, b], queue)
    }

    /// `a · b`
    pub fn multiplication(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        a: FieldId,
        b: FieldId,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Multiplication, &[a, b], queue)
    }

    /// `numerator / denominator`, `0` for a zero denominator.
    pub fn division(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        numerator: FieldId,
        denominator: FieldId,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(
            FieldSpec::new(owner, label),
            FieldKind::Division,
            &[numerator, denominator],
            queue,
        )
    }

    /// `f(x)`
    pub fn function(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        input: FieldId,
        f: ActivationFn,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Function(f), &[input], queue)
    }

    /// `f(a, b)`
    pub fn bi_function(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        a: FieldId,
        b: FieldId,
        f: BinaryFn,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::BiFunction(f), &[a, b], queue)
    }

    /// `1.0` while `comparison` holds for `input` against `threshold`, else `0.0`.
    pub fn threshold(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        input: FieldId,
        threshold: f64,
        comparison: Comparison,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(
            FieldSpec::new(owner, label),
            FieldKind::Threshold {
                threshold,
                comparison,
            },
            &[input],
            queue,
        )
    }

    /// `factor · x`
    pub fn scale(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        input: FieldId,
        factor: f64,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Scale(factor), &[input], queue)
    }

    /// `1 − x`
    pub fn invert(
        &mut self,
        owner: ElementId,
        label: impl Into<String>,
        input: FieldId,
        queue: &mut Queue,
    ) -> Result<FieldId> {
        self.combine(FieldSpec::new(owner, label), FieldKind::Invert, &[input], queue)
    }

    // ── Wiring ────────────────────────────────────────────────────────────

    /// Create a link from `source` into argument `arg` of `target` and connect it.
    ///
    /// With `initialize`, an initialised source pushes its current value through
    /// the new link immediately.
    pub fn connect(
        &mut self,
        source: FieldId,
        target: FieldId,
        arg: usize,
        initialize: bool,
        queue: &mut Queue,
    ) -> Result<LinkId> {
        self.field(source)?;
        let kind = &self.field(target)?.kind;
        if let Some(arity) = kind.arity() {
            if arg >= arity {
                return Err(FieldError::ArgumentOutOfRange {
                    field: target,
                    kind: kind.name(),
                    arg,
                    arity,
                });
            }
        }
        self.check_slot_free(source, target, arg)?;

        let id = LinkId(self.links.len() as u32);
        self.links.push(Some(FieldLink::new(source, target, arg)));
        self.attach(id, initialize, queue)?;
        Ok(id)
    }

    /// Reconnect a previously disconnected link.
    pub fn connect_link(&mut self, link: LinkId, initialize: bool, queue: &mut Queue) -> Result<()> {
        let l = self.link(link)?;
        if l.connected {
            return Err(FieldError::DuplicateLink {
                from: l.source,
                to: l.target,
                arg: l.arg,
            });
        }
        let (source, target, arg) = (l.source, l.target, l.arg);
        self.check_slot_free(source, target, arg)?;
        self.attach(link, initialize, queue)
    }

    /// Disconnect a link. With `deinitialize`, a target that has observed the
    /// source first receives an update removing the source's contribution.
    pub fn disconnect_link(
        &mut self,
        link: LinkId,
        deinitialize: bool,
        queue: &mut Queue,
    ) -> Result<()> {
        let l = self.link(link)?;
        if !l.connected {
            return Err(FieldError::DanglingLinkRemoval { link });
        }
        let (source, target, observed) = (l.source, l.target, l.observed);

        if deinitialize && observed {
            if let Some(v) = self.field(source)?.value {
                self.transmit(&[link], Some(v), None, queue)?;
            }
        }

        self.field_mut(source)?.outputs.retain(|&l| l != link);
        self.field_mut(target)?.inputs.retain(|&l| l != link);
        let l = self.link_mut(link)?;
        l.connected = false;
        l.observed = false;
        debug!(%link, from = %source, to = %target, deinitialize, "link disconnected");
        Ok(())
    }

    /// Tear a field down: drop its inputs silently, drop its outputs with a
    /// compensating update, cancel its queued step and clear its state.
    /// Safe to call repeatedly.
    pub fn disconnect_field(&mut self, id: FieldId, queue: &mut Queue) -> Result<()> {
        let field = self.field(id)?;
        let inputs = field.inputs.clone();
        let outputs = field.outputs.clone();
        for link in inputs {
            self.disconnect_link(link, false, queue)?;
        }
        for link in outputs {
            self.disconnect_link(link, true, queue)?;
        }
        queue.cancel_field(id);
        self.field_mut(id)?.clear();
        Ok(())
    }

    /// Tear down every field registered to `owner`. Returns how many there were.
    pub fn disconnect_owner(&mut self, owner: ElementId, queue: &mut Queue) -> Result<usize> {
        let owned = self.fields_of(owner).to_vec();
        for &field in &owned {
            self.disconnect_field(field, queue)?;
        }
        Ok(owned.len())
    }

    fn check_slot_free(&self, source: FieldId, target: FieldId, arg: usize) -> Result<()> {
        let t = self.field(target)?;
        if t.kind.arity().is_none() {
            return Ok(());
        }
        for &existing in &t.inputs {
            if self.link(existing)?.arg == arg {
                return Err(FieldError::DuplicateLink {
                    from: source,
                    to: target,
                    arg,
                });
            }
        }
        Ok(())
    }

    fn attach(&mut self, link: LinkId, initialize: bool, queue: &mut Queue) -> Result<()> {
        let l = self.link_mut(link)?;
        l.connected = true;
        let (source, target) = (l.source, l.target);
        self.field_mut(source)?.outputs.push(link);
        self.field_mut(target)?.inputs.push(link);
        debug!(%link, from = %source, to = %target, initialize, "link connected");

        if initialize {
            if let Some(v) = self.field(source)?.value {
                self.transmit(&[link], None, Some(v), queue)?;
            }
        }
        Ok(())
    }

    // ── Values ────────────────────────────────────────────────────────────

    /// Committed value of a field.
    pub fn value(&self, id: FieldId) -> Result<f64> {
        self.field(id)?.value()
    }

    /// Committed value, or `None` while uninitialised.
    pub fn try_value(&self, id: FieldId) -> Result<Option<f64>> {
        Ok(self.field(id)?.value)
    }

    /// Pending (not yet committed) delta.
    pub fn pending(&self, id: FieldId) -> Result<Option<f64>> {
        Ok(self.field(id)?.pending)
    }

    /// Move a field towards `v` by sending it the difference to its value plus
    /// pending delta (or `v` itself if it has neither).
    pub fn set_value(&mut self, id: FieldId, v: f64, queue: &mut Queue) -> Result<()> {
        let delta = match self.field(id)?.prospective() {
            Some(current) => v - current,
            None => v,
        };
        self.receive_update(id, delta, queue)
    }

    /// Accumulate `delta` into a field's pending update. Direct fields apply it
    /// at once; queued fields schedule one step per field.
    pub fn receive_update(&mut self, id: FieldId, delta: f64, queue: &mut Queue) -> Result<()> {
        let field = self.field_mut(id)?;
        field.accumulate(delta);
        let (mode, owner) = (field.mode, field.owner);
        match mode {
            UpdateMode::Direct => {
                self.apply_pending(id, queue)?;
            }
            UpdateMode::Queued(spec) => {
                let sort = self.field(id)?.sort_value(spec.sort);
                let action = StepAction::ApplyField(id);
                if !queue.enqueue(owner, spec.phase, action, sort) && sort.is_some() {
                    queue.update_sort(owner, spec.phase, action, sort);
                }
            }
        }
        Ok(())
    }

    /// Commit the pending delta if the field's policy accepts it, then notify
    /// listeners and outputs. Returns whether a value was committed.
    ///
    /// A rejected delta stays pending and combines with later deltas. A
    /// non-finite or cancelling delta is replaced by a full recomputation
    /// (see [`FieldGraph::recompute`]) or dropped when none is available.
    pub fn apply_pending(&mut self, id: FieldId, queue: &mut Queue) -> Result<bool> {
        let tolerance = self.config.tolerance;
        let field = self.field(id)?;
        let Some(mut delta) = field.pending else {
            return Ok(false);
        };
        let old = field.value;
        let base = old.unwrap_or(0.0);
        let mut new = base + delta;
        let cancels = base.abs().max(delta.abs()) > RESYNC_RATIO * new.abs().max(1.0);
        if !new.is_finite() || cancels {
            match self.recompute(id)? {
                Some(full) if full.is_finite() => {
                    trace!(field = %id, delta, full, "incremental update resynchronised");
                    delta = full - base;
                    new = full;
                }
                _ if new.is_finite() => {}
                _ => {
                    warn!(field = %id, delta, "dropping non-finite update");
                    self.field_mut(id)?.pending = None;
                    return Ok(false);
                }
            }
        }

        let field = self.field_mut(id)?;
        field.pending = Some(delta);
        if !field.policy.should_propagate(old, new, delta, tolerance) {
            if delta == 0.0 {
                field.pending = None;
            }
            trace!(field = %id, delta, "update below propagation floor");
            return Ok(false);
        }
        field.pending = None;
        field.value = Some(new);
        trace!(field = %id, ?old, new, "value committed");

        self.record_events(id, old, new)?;
        self.propagate(id, old, Some(new), queue)?;
        Ok(true)
    }

    /// Forward a committed change of `source` to every connected output,
    /// one update per target in first-connection order.
    fn propagate(
        &mut self,
        source: FieldId,
        old: Option<f64>,
        new: Option<f64>,
        queue: &mut Queue,
    ) -> Result<()> {
        let outputs = self.field(source)?.outputs.clone();
        let mut groups: Vec<Vec<LinkId>> = Vec::new();
        let mut by_target: HashMap<FieldId, usize> = HashMap::new();
        for link in outputs {
            let target = self.link(link)?.target;
            match by_target.get(&target) {
                Some(&i) => groups[i].push(link),
                None => {
                    by_target.insert(target, groups.len());
                    groups.push(vec![link]);
                }
            }
        }
        for links in groups {
            self.transmit(&links, old, new, queue)?;
        }
        Ok(())
    }

    /// Carry one source change across `links` into their common target.
    /// Links disconnected in the meantime are skipped.
    fn transmit(
        &mut self,
        links: &[LinkId],
        old: Option<f64>,
        new: Option<f64>,
        queue: &mut Queue,
    ) -> Result<()> {
        let mut target = None;
        let mut args: Vec<usize> = Vec::with_capacity(links.len());
        for &link in links {
            let l = self.link_mut(link)?;
            if !l.connected {
                continue;
            }
            l.observed = new.is_some();
            target = Some(l.target);
            args.push(l.arg);
        }
        let Some(target) = target else {
            return Ok(());
        };

        let delta = self
            .field(target)?
            .kind
            .delta_shared(&args, old, new, |i| self.argument_value(target, i));
        match delta {
            Some(d) => self.receive_update(target, d, queue),
            None => Ok(()),
        }
    }

    /// Current value of the source connected to argument `arg` of `target`.
    fn argument_value(&self, target: FieldId, arg: usize) -> Option<f64> {
        let t = self.field(target).ok()?;
        t.inputs.iter().find_map(|&link| {
            let l = self.link(link).ok()?;
            if l.arg == arg {
                self.field(l.source).ok()?.value
            } else {
                None
            }
        })
    }

    /// Current input values by argument slot (input order for variadic kinds).
    pub fn argument_values(&self, id: FieldId) -> Result<Vec<Option<f64>>> {
        let field = self.field(id)?;
        match field.kind.arity() {
            Some(arity) => {
                let mut args = vec![None; arity];
                for &link in &field.inputs {
                    let l = self.link(link)?;
                    if let Some(slot) = args.get_mut(l.arg) {
                        *slot = self.field(l.source)?.value;
                    }
                }
                Ok(args)
            }
            None => field
                .inputs
                .iter()
                .map(|&link| Ok(self.field(self.link(link)?.source)?.value))
                .collect(),
        }
    }

    /// Full, non-incremental evaluation of a combinator from its inputs'
    /// current values. `None` for input fields and absent results.
    pub fn recompute(&self, id: FieldId) -> Result<Option<f64>> {
        let args = self.argument_values(id)?;
        Ok(self.field(id)?.kind.evaluate(&args))
    }

    // ── Persistence boundary ──────────────────────────────────────────────

    /// Scalar value for persistence. Topology is the caller's to rebuild.
    pub fn write(&self, id: FieldId) -> Result<f64> {
        self.value(id)
    }

    /// Restore a persisted value without propagating it. Any pending delta is
    /// dropped.
    pub fn read(&mut self, id: FieldId, value: f64) -> Result<()> {
        let field = self.field_mut(id)?;
        field.value = Some(value);
        field.pending = None;
        Ok(())
    }

    // ── Listeners ─────────────────────────────────────────────────────────

    /// Register a listener for a transition of `field`.
    pub fn add_event_listener(
        &mut self,
        field: FieldId,
        name: &'static str,
        kind: EventKind,
    ) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener);
        self.field_mut(field)?
            .listeners
            .push(Listener { id, name, kind })
            .map_err(|_| FieldError::ListenerCapacity {
                field,
                capacity: MAX_LISTENERS,
            })?;
        self.next_listener += 1;
        Ok(id)
    }

    /// Remove a listener. Returns whether it was registered on `field`.
    pub fn remove_event_listener(&mut self, field: FieldId, listener: ListenerId) -> Result<bool> {
        let listeners = &mut self.field_mut(field)?.listeners;
        let before = listeners.len();
        listeners.retain(|l| l.id != listener);
        Ok(listeners.len() != before)
    }

    fn record_events(&mut self, id: FieldId, old: Option<f64>, new: f64) -> Result<()> {
        let Some(kind) = EventKind::between(old, new, self.config.truth_threshold) else {
            return Ok(());
        };
        let field = self.field(id)?;
        let owner = field.owner;
        let matched: Vec<Listener> = field
            .listeners
            .iter()
            .filter(|l| l.kind == kind)
            .copied()
            .collect();
        for listener in matched {
            self.events.push(FieldEvent {
                field: id,
                owner,
                listener: listener.id,
                name: listener.name,
                kind,
                value: new,
            });
        }
        Ok(())
    }

    /// Take every event recorded since the last call.
    pub fn take_events(&mut self) -> Vec<FieldEvent> {
        core::mem::take(&mut self.events)
    }

    /// Whether events are waiting to be taken.
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

impl Default for FieldGraph {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    fn setup() -> (FieldGraph, Queue, ElementId) {
        let mut q = Queue::new();
        let e = q.new_element();
        (FieldGraph::default(), q, e)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_input_set_value_initialises() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        assert!(matches!(
            g.value(a),
            Err(FieldError::UninitializedFieldAccess { .. })
        ));
        g.set_value(a, 2.0, &mut q).unwrap();
        assert_eq!(g.value(a).unwrap(), 2.0);
        g.set_value(a, 5.0, &mut q).unwrap();
        assert_eq!(g.value(a).unwrap(), 5.0);
    }

    #[test]
    fn test_zero_first_value_still_initialises() {
        let (mut g, mut q, e) = setup();
        let bias = g.input(e, "bias");
        g.set_value(bias, 0.0, &mut q).unwrap();
        assert_eq!(g.value(bias).unwrap(), 0.0);
    }

    #[test]
    fn test_weighted_sum_scenario() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        g.set_value(a, 2.0, &mut q).unwrap();
        g.set_value(b, 1.0, &mut q).unwrap();
        let s = g.weighted_sum(e, "s", &[(a, 3.0), (b, 1.0)], &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 7.0);

        g.set_value(a, 4.0, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 11.0);
    }

    #[test]
    fn test_small_update_is_held_back_then_combined() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let s = g.scale(e, "s", a, 1.0, &mut q).unwrap();
        g.set_value(a, 1.0, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 1.0);

        g.receive_update(a, 0.0006, &mut q).unwrap();
        assert_eq!(g.value(a).unwrap(), 1.0);
        assert_eq!(g.value(s).unwrap(), 1.0);
        assert_eq!(g.pending(a).unwrap(), Some(0.0006));

        g.receive_update(a, 0.0006, &mut q).unwrap();
        assert!(approx(g.value(a).unwrap(), 1.0012));
        assert!(approx(g.value(s).unwrap(), 1.0012));
        assert_eq!(g.pending(a).unwrap(), None);
    }

    #[test]
    fn test_set_value_below_tolerance_keeps_value() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        g.set_value(a, 1.0, &mut q).unwrap();
        g.set_value(a, 1.0001, &mut q).unwrap();
        assert_eq!(g.value(a).unwrap(), 1.0);
        // Setting back to the committed value cancels the held-back delta.
        g.set_value(a, 1.0, &mut q).unwrap();
        assert_eq!(g.pending(a).unwrap(), None);
    }

    #[test]
    fn test_product_absent_until_both_inputs_exist() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        let p = g.multiplication(e, "p", a, b, &mut q).unwrap();
        g.set_value(a, 3.0, &mut q).unwrap();
        assert_eq!(g.try_value(p).unwrap(), None);
        g.set_value(b, 2.0, &mut q).unwrap();
        assert_eq!(g.value(p).unwrap(), 6.0);
        g.set_value(a, 5.0, &mut q).unwrap();
        assert_eq!(g.value(p).unwrap(), 10.0);
    }

    #[test]
    fn test_division_zero_denominator_is_zero() {
        let (mut g, mut q, e) = setup();
        let n = g.input(e, "n");
        let d = g.input(e, "d");
        g.set_value(n, 4.0, &mut q).unwrap();
        g.set_value(d, 0.0, &mut q).unwrap();
        let r = g.division(e, "r", n, d, &mut q).unwrap();
        assert_eq!(g.value(r).unwrap(), 0.0);
        g.set_value(d, 2.0, &mut q).unwrap();
        assert_eq!(g.value(r).unwrap(), 2.0);
        g.set_value(d, 0.0, &mut q).unwrap();
        assert_eq!(g.value(r).unwrap(), 0.0);
    }

    #[test]
    fn test_occupied_slot_is_duplicate() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        let inv = g.invert(e, "inv", a, &mut q).unwrap();
        let err = g.connect(b, inv, 0, true, &mut q).unwrap_err();
        assert!(matches!(err, FieldError::DuplicateLink { .. }));
    }

    #[test]
    fn test_one_source_in_several_slots() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let sq = g.multiplication(e, "sq", a, a, &mut q).unwrap();
        let zero = g.subtraction(e, "zero", a, a, &mut q).unwrap();
        let triple = g.weighted_sum(e, "triple", &[(a, 1.0), (a, 2.0)], &mut q).unwrap();
        let twice = g.sum(e, "twice", &[a, a], &mut q).unwrap();

        for v in [3.0, -2.0, 0.5, 10.0] {
            g.set_value(a, v, &mut q).unwrap();
            assert!(approx(g.value(sq).unwrap(), v * v), "sq at {}", v);
            assert_eq!(g.value(zero).unwrap(), 0.0);
            assert!(approx(g.value(triple).unwrap(), 3.0 * v));
            assert!(approx(g.value(twice).unwrap(), 2.0 * v));
        }

        // Wiring onto an already initialised source.
        let late = g.multiplication(e, "late", a, a, &mut q).unwrap();
        assert_eq!(g.value(late).unwrap(), 100.0);
    }

    #[test]
    fn test_exp_overflow_does_not_wedge_field() {
        let (mut g, mut q, e) = setup();
        let x = g.input(e, "x");
        g.set_value(x, 1.0, &mut q).unwrap();
        let f = g.function(e, "f", x, ActivationFn::Exp, &mut q).unwrap();

        g.set_value(x, 800.0, &mut q).unwrap();
        assert!(approx(g.value(f).unwrap(), core::f64::consts::E));
        assert_eq!(g.pending(f).unwrap(), None);

        g.set_value(x, 2.0, &mut q).unwrap();
        assert!(approx(g.value(f).unwrap(), libm::exp(2.0)));
        g.set_value(x, 800.0, &mut q).unwrap();
        g.set_value(x, 3.0, &mut q).unwrap();
        assert!(approx(g.value(f).unwrap(), libm::exp(3.0)));
        assert_eq!(g.pending(f).unwrap(), None);
    }

    #[test]
    fn test_cancelling_update_is_recomputed() {
        let (mut g, mut q, e) = setup();
        let x = g.input(e, "x");
        let f = g.function(e, "f", x, ActivationFn::Exp, &mut q).unwrap();
        g.set_value(x, 500.0, &mut q).unwrap();
        g.set_value(x, 3.0, &mut q).unwrap();
        assert!(approx(g.value(f).unwrap(), libm::exp(3.0)));
    }

    #[test]
    fn test_len_counts_fields() {
        let (mut g, mut q, e) = setup();
        assert!(g.is_empty());
        let a = g.input(e, "a");
        g.scale(e, "s", a, 2.0, &mut q).unwrap();
        assert_eq!(g.len(), 2);
        g.disconnect_field(a, &mut q).unwrap();
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_connect_argument_out_of_range() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        let err = g.connect(a, b, 0, true, &mut q).unwrap_err();
        assert!(matches!(err, FieldError::ArgumentOutOfRange { arity: 0, .. }));
    }

    #[test]
    fn test_reconnect_connected_link_is_duplicate() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let s = g.add_field(FieldSpec::new(e, "s"), FieldKind::Sum);
        let link = g.connect(a, s, 0, true, &mut q).unwrap();
        assert!(matches!(
            g.connect_link(link, true, &mut q),
            Err(FieldError::DuplicateLink { .. })
        ));
    }

    #[test]
    fn test_disconnect_twice_is_dangling() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let s = g.add_field(FieldSpec::new(e, "s"), FieldKind::Sum);
        let link = g.connect(a, s, 0, true, &mut q).unwrap();
        g.disconnect_link(link, true, &mut q).unwrap();
        assert_eq!(
            g.disconnect_link(link, true, &mut q),
            Err(FieldError::DanglingLinkRemoval { link })
        );
    }

    #[test]
    fn test_disconnect_compensates_and_reconnect_restores() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        g.set_value(a, 2.0, &mut q).unwrap();
        g.set_value(b, 5.0, &mut q).unwrap();
        let s = g.weighted_sum(e, "s", &[(a, 3.0), (b, 1.0)], &mut q).unwrap();
        let link = g.field(s).unwrap().inputs()[0];

        g.disconnect_link(link, true, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 5.0);
        let l = g.link(link).unwrap();
        assert!(!l.is_connected());
        assert!(!g.field(a).unwrap().outputs().contains(&link));
        assert!(!g.field(s).unwrap().inputs().contains(&link));

        g.set_value(a, 4.0, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 5.0);

        g.connect_link(link, true, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 17.0);
    }

    #[test]
    fn test_disconnect_without_deinitialize_keeps_contribution() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        g.set_value(a, 2.0, &mut q).unwrap();
        let s = g.sum(e, "s", &[a], &mut q).unwrap();
        let link = g.field(s).unwrap().inputs()[0];
        g.disconnect_link(link, false, &mut q).unwrap();
        assert_eq!(g.value(s).unwrap(), 2.0);
    }

    #[test]
    fn test_disconnect_field_is_idempotent() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        g.set_value(a, 2.0, &mut q).unwrap();
        let mid = g.scale(e, "mid", a, 2.0, &mut q).unwrap();
        let out = g.sum(e, "out", &[mid], &mut q).unwrap();
        assert_eq!(g.value(out).unwrap(), 4.0);

        g.disconnect_field(mid, &mut q).unwrap();
        assert_eq!(g.try_value(mid).unwrap(), None);
        assert_eq!(g.value(out).unwrap(), 0.0);
        assert!(g.field(a).unwrap().outputs().is_empty());
        assert!(g.field(out).unwrap().inputs().is_empty());

        g.disconnect_field(mid, &mut q).unwrap();
        g.set_value(a, 10.0, &mut q).unwrap();
        assert_eq!(g.value(out).unwrap(), 0.0);
    }

    #[test]
    fn test_disconnect_owner_tears_down_registered_fields() {
        let (mut g, mut q, e) = setup();
        let other = q.new_element();
        let a = g.input(other, "a");
        g.set_value(a, 1.0, &mut q).unwrap();
        let x = g.scale(e, "x", a, 2.0, &mut q).unwrap();
        let y = g.scale(e, "y", x, 2.0, &mut q).unwrap();
        assert_eq!(g.fields_of(e), &[x, y]);
        assert_eq!(g.disconnect_owner(e, &mut q).unwrap(), 2);
        assert_eq!(g.try_value(x).unwrap(), None);
        assert_eq!(g.try_value(y).unwrap(), None);
        assert_eq!(g.value(a).unwrap(), 1.0);
    }

    #[test]
    fn test_queued_field_defers_until_applied() {
        let (mut g, mut q, e) = setup();
        let a = g.add_field(
            FieldSpec::new(e, "a").mode(UpdateMode::queued(Phase::Inference)),
            FieldKind::Input,
        );
        g.receive_update(a, 1.0, &mut q).unwrap();
        g.receive_update(a, 2.0, &mut q).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(g.try_value(a).unwrap(), None);
        assert_eq!(g.pending(a).unwrap(), Some(3.0));

        let step = q.pop().unwrap();
        assert_eq!(step.action, StepAction::ApplyField(a));
        assert!(g.apply_pending(a, &mut q).unwrap());
        assert_eq!(g.value(a).unwrap(), 3.0);
    }

    #[test]
    fn test_queued_field_teardown_cancels_step() {
        let (mut g, mut q, e) = setup();
        let a = g.add_field(
            FieldSpec::new(e, "a").mode(UpdateMode::queued(Phase::Training)),
            FieldKind::Input,
        );
        g.receive_update(a, 1.0, &mut q).unwrap();
        g.disconnect_field(a, &mut q).unwrap();
        assert!(q.is_empty());
        assert_eq!(g.pending(a).unwrap(), None);
    }

    #[test]
    fn test_bounded_policy_blocks_out_of_range() {
        let (mut g, mut q, e) = setup();
        let a = g.add_field(
            FieldSpec::new(e, "a").policy(PropagationPolicy::Bounded { min: 0.0, max: 1.0 }),
            FieldKind::Input,
        );
        g.set_value(a, 0.5, &mut q).unwrap();
        g.set_value(a, 1.5, &mut q).unwrap();
        assert_eq!(g.value(a).unwrap(), 0.5);
    }

    #[test]
    fn test_threshold_listener_fires_once() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let t = g.threshold(e, "t", a, 0.0, Comparison::Above, &mut q).unwrap();
        let id = g.add_event_listener(t, "fired", EventKind::BecameTrue).unwrap();

        g.set_value(a, -1.0, &mut q).unwrap();
        assert_eq!(g.value(t).unwrap(), 0.0);
        assert!(!g.has_events());

        g.set_value(a, 2.0, &mut q).unwrap();
        g.set_value(a, 3.0, &mut q).unwrap();
        let events = g.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].listener, id);
        assert_eq!(events[0].name, "fired");
        assert_eq!(events[0].value, 1.0);

        g.set_value(a, -2.0, &mut q).unwrap();
        assert_eq!(g.value(t).unwrap(), 0.0);
        assert!(g.take_events().is_empty());
    }

    #[test]
    fn test_listener_capacity_and_removal() {
        let (mut g, _q, e) = setup();
        let a = g.input(e, "a");
        let mut ids = Vec::new();
        for _ in 0..MAX_LISTENERS {
            ids.push(g.add_event_listener(a, "x", EventKind::BecameTrue).unwrap());
        }
        assert!(matches!(
            g.add_event_listener(a, "x", EventKind::BecameTrue),
            Err(FieldError::ListenerCapacity { .. })
        ));
        assert!(g.remove_event_listener(a, ids[0]).unwrap());
        assert!(!g.remove_event_listener(a, ids[0]).unwrap());
        assert!(g.add_event_listener(a, "x", EventKind::BecameTrue).is_ok());
    }

    #[test]
    fn test_write_and_read() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let s = g.scale(e, "s", a, 2.0, &mut q).unwrap();
        assert!(g.write(a).is_err());
        g.read(a, 3.0).unwrap();
        assert_eq!(g.write(a).unwrap(), 3.0);
        // Reading does not propagate.
        assert_eq!(g.try_value(s).unwrap(), None);
    }

    #[test]
    fn test_recompute_matches_incremental() {
        let (mut g, mut q, e) = setup();
        let a = g.input(e, "a");
        let b = g.input(e, "b");
        let m = g.bi_function(e, "m", a, b, BinaryFn::Max, &mut q).unwrap();
        for (x, y) in [(1.0, 2.0), (3.0, 2.0), (-1.0, 0.5), (4.0, 4.0)] {
            g.set_value(a, x, &mut q).unwrap();
            g.set_value(b, y, &mut q).unwrap();
            assert!(approx(g.value(m).unwrap(), g.recompute(m).unwrap().unwrap()));
        }
    }

    #[test]
    fn test_unknown_ids() {
        let (mut g, mut q, _e) = setup();
        assert_eq!(g.value(FieldId(9)), Err(FieldError::UnknownField(FieldId(9))));
        assert!(matches!(g.link(LinkId(0)), Err(FieldError::UnknownLink(_))));
        assert!(g.set_value(FieldId(1), 1.0, &mut q).is_err());
    }
}
