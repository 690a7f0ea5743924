//! Error taxonomy for field wiring, value access and step execution.
//!
//! Wiring errors are programming errors and are surfaced immediately.
//! Numeric edge cases (zero denominators, absent optional inputs) are resolved
//! by policy in [`crate::combinator`] and never reach this type.

use alloc::boxed::Box;
use alloc::string::String;

use crate::field::FieldId;
use crate::link::LinkId;
use crate::phase::Phase;
use crate::step::ElementId;

/// Result alias used across the crate.
pub type Result<T, E = FieldError> = core::result::Result<T, E>;

/// Errors raised by the field graph and the step scheduler.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FieldError {
    /// A field value was read before the field was ever initialised.
    #[error("field `{label}` ({field}) read before it was initialised")]
    UninitializedFieldAccess {
        /// The field that was read.
        field: FieldId,
        /// Its diagnostic label.
        label: String,
    },

    /// A link is already connected, or the fixed-arity target already has an
    /// input in the same argument slot.
    #[error("link {from} -> {to} (argument {arg}) is already connected")]
    DuplicateLink {
        /// Source field of the rejected link.
        from: FieldId,
        /// Target field of the rejected link.
        to: FieldId,
        /// Argument slot on the target.
        arg: usize,
    },

    /// A link was disconnected that is not currently connected.
    #[error("link {link} is not connected")]
    DanglingLinkRemoval {
        /// The offending link.
        link: LinkId,
    },

    /// No field with this id exists in the graph.
    #[error("unknown field {0}")]
    UnknownField(FieldId),

    /// No link with this id exists in the graph.
    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    /// The argument index exceeds the combinator's fixed arity.
    #[error("argument {arg} out of range for {kind} field {field} (arity {arity})")]
    ArgumentOutOfRange {
        /// Target field.
        field: FieldId,
        /// Combinator kind name.
        kind: &'static str,
        /// Requested argument.
        arg: usize,
        /// Number of arguments the kind accepts.
        arity: usize,
    },

    /// The field's listener list is full.
    #[error("field {field} already holds {capacity} listeners")]
    ListenerCapacity {
        /// Field the listener was added to.
        field: FieldId,
        /// Maximum listeners per field.
        capacity: usize,
    },

    /// `drain` was called while the queue was already draining.
    #[error("queue is already draining")]
    ReentrantDrain,

    /// A drain executed more steps than the configured budget allows.
    #[error("drain exceeded the budget of {limit} steps")]
    StepBudgetExceeded {
        /// Configured budget.
        limit: u64,
    },

    /// A step failed; the rest of the queue was discarded.
    #[error("step failed in phase {phase} for element {element}")]
    QueueStepFailure {
        /// Phase of the failed step.
        phase: Phase,
        /// Owning element of the failed step.
        element: ElementId,
        /// Underlying failure.
        #[source]
        cause: Box<FieldError>,
    },

    /// A caller-defined task reported a failure.
    #[error("task failed: {0}")]
    Task(String),
}

impl FieldError {
    /// Innermost error, unwrapping any [`FieldError::QueueStepFailure`] layers.
    pub fn root_cause(&self) -> &FieldError {
        match self {
            FieldError::QueueStepFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
