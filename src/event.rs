//! Observer list for boolean-like field transitions.
//!
//! Listeners are plain records, not closures: a field holds a bounded list of
//! [`Listener`]s and the graph appends a [`FieldEvent`] whenever a committed
//! value crosses the truth threshold in the direction a listener watches.
//! Events are delivered to [`crate::thought::StepHandler::on_event`] by the
//! drain loop, or collected with [`crate::graph::FieldGraph::take_events`].

use crate::field::FieldId;
use crate::step::ElementId;

/// Maximum listeners per field.
pub const MAX_LISTENERS: usize = 4;

/// Bounded listener list stored inline in each field.
pub type ListenerList = heapless::Vec<Listener, MAX_LISTENERS>;

/// Handle of a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ListenerId(pub(crate) u32);

/// Transition a listener watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// The value moved from false (or absent) to true.
    BecameTrue,
    /// The value moved from true to false.
    BecameFalse,
}

impl EventKind {
    /// Transition between two committed values, if any.
    ///
    /// A value is true when it is at or above `threshold`. An absent old value
    /// counts as false, so the first true value is a [`EventKind::BecameTrue`]
    /// and a first false value is no transition at all.
    pub fn between(old: Option<f64>, new: f64, threshold: f64) -> Option<EventKind> {
        let was = old.is_some_and(|v| v >= threshold);
        let is = new >= threshold;
        match (was, is) {
            (false, true) => Some(EventKind::BecameTrue),
            (true, false) => Some(EventKind::BecameFalse),
            _ => None,
        }
    }
}

/// A registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Listener {
    /// Handle returned on registration.
    pub id: ListenerId,
    /// Caller-chosen event name, e.g. `"fired"`.
    pub name: &'static str,
    /// Transition the listener reacts to.
    pub kind: EventKind,
}

/// A transition observed by a listener.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldEvent {
    /// Field whose value crossed the threshold.
    pub field: FieldId,
    /// Owning element of that field.
    pub owner: ElementId,
    /// Listener that matched.
    pub listener: ListenerId,
    /// Listener name.
    pub name: &'static str,
    /// Transition that happened.
    pub kind: EventKind,
    /// Committed value after the transition.
    pub value: f64,
}
