//! Engine-wide configuration shared by the field graph and the drain loop.

/// Default propagation floor for initialised fields.
///
/// Smaller than any meaningful activation or weight change, larger than the
/// floating-point noise accumulated over a few dozen levels of recursion.
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Default value at or above which a field reads as "true" for listeners.
pub const DEFAULT_TRUTH_THRESHOLD: f64 = 0.5;

/// Configuration for one unit of work.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Minimum `|delta|` an initialised field propagates under the default
    /// policy. Default: [`DEFAULT_TOLERANCE`].
    pub tolerance: f64,

    /// Boundary for [`crate::event::EventKind`] transitions.
    /// Default: [`DEFAULT_TRUTH_THRESHOLD`].
    pub truth_threshold: f64,

    /// Maximum number of steps one drain may execute before it aborts with
    /// [`crate::FieldError::StepBudgetExceeded`]. `None` means unbounded.
    pub max_steps_per_drain: Option<u64>,
}

impl EngineConfig {
    /// Construct the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the propagation floor. Negative values are treated as zero.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    /// Replace the truth threshold used for listener events.
    pub fn with_truth_threshold(mut self, threshold: f64) -> Self {
        self.truth_threshold = threshold;
        self
    }

    /// Bound the number of steps a single drain may execute.
    pub fn with_step_budget(mut self, limit: u64) -> Self {
        self.max_steps_per_drain = Some(limit);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            truth_threshold: DEFAULT_TRUTH_THRESHOLD,
            max_steps_per_drain: None,
        }
    }
}
