//! Tolerance gate deciding whether a field commits and forwards an update.
//!
//! Closed feedback loops shrink their deltas on every pass. Without a hard
//! floor the queue would never quiesce, so an initialised field drops any
//! delta smaller than the tolerance. An uninitialised field always commits its
//! first value, however small, so that zero-valued biases are still wired.
//!
//! # Invariants
//!
//! - Non-finite values never propagate, whatever the policy.
//! - A rejected delta leaves the field's value untouched.

use tracing::warn;

/// Per-field propagation precondition.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropagationPolicy {
    /// Gate on the engine-wide tolerance.
    #[default]
    Tolerance,
    /// Gate on a field-specific tolerance instead of the engine-wide one.
    CustomTolerance(f64),
    /// Engine tolerance gate, plus the new value must stay inside `[min, max]`.
    ///
    /// Used by fields that govern phase transitions and must never leave a
    /// permitted range, even with their first value.
    Bounded {
        /// Smallest permitted value.
        min: f64,
        /// Largest permitted value.
        max: f64,
    },
    /// Propagate every change, however small.
    Always,
}

impl PropagationPolicy {
    /// Decide whether `delta`, taking the field from `current` to `new`,
    /// should be committed and forwarded.
    ///
    /// `tolerance` is the engine-wide floor from
    /// [`crate::config::EngineConfig::tolerance`].
    pub fn should_propagate(
        &self,
        current: Option<f64>,
        new: f64,
        delta: f64,
        tolerance: f64,
    ) -> bool {
        if !new.is_finite() {
            warn!(new, delta, "refusing to propagate non-finite value");
            return false;
        }
        match *self {
            PropagationPolicy::Tolerance => passes_floor(current, delta, tolerance),
            PropagationPolicy::CustomTolerance(t) => passes_floor(current, delta, t),
            PropagationPolicy::Bounded { min, max } => {
                new >= min && new <= max && passes_floor(current, delta, tolerance)
            }
            PropagationPolicy::Always => true,
        }
    }
}

fn passes_floor(current: Option<f64>, delta: f64, tolerance: f64) -> bool {
    current.is_none() || delta.abs() >= tolerance
}
