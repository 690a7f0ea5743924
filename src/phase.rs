//! Pipeline phases that impose a total order on step execution.
//!
//! Every step belongs to exactly one [`Phase`]. The queue never hands out a
//! step of a later phase while a step of an earlier phase is still queued,
//! including steps inserted while a later phase is being drained.
//!
//! ```text
//! Init < Inference < Counting < Linking < Training < Template < Anneal < Processing < Post
//! ```
//!
//! # Invariants
//!
//! - The phase list is closed: the derived `Ord` is the only ordering used.
//! - `Phase::ALL` lists every variant in ascending order.

use core::fmt;

// ─── Phase ──────────────────────────────────────────────────────────────────

/// Pipeline stage of a deferred step.
///
/// Declaration order is execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Structural set-up of a freshly created element.
    Init,
    /// Forward value propagation (net input, activation values).
    Inference,
    /// Frequency and statistics counting.
    Counting,
    /// Creation of new links between elements.
    Linking,
    /// Gradient and weight updates.
    Training,
    /// Template induction.
    Template,
    /// Annealing of bias and weight schedules.
    Anneal,
    /// Generic deferred processing after learning.
    Processing,
    /// Final bookkeeping before the unit of work closes.
    Post,
}

impl Phase {
    /// Every phase in ascending order.
    pub const ALL: [Phase; 9] = [
        Phase::Init,
        Phase::Inference,
        Phase::Counting,
        Phase::Linking,
        Phase::Training,
        Phase::Template,
        Phase::Anneal,
        Phase::Processing,
        Phase::Post,
    ];

    /// Stable lower-case name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Inference => "inference",
            Phase::Counting => "counting",
            Phase::Linking => "linking",
            Phase::Training => "training",
            Phase::Template => "template",
            Phase::Anneal => "anneal",
            Phase::Processing => "processing",
            Phase::Post => "post",
        }
    }

    /// Position of this phase in [`Phase::ALL`].
    pub fn rank(self) -> usize {
        self as usize
    }

    /// The phase that follows this one, or `None` for [`Phase::Post`].
    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.rank() + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
