//! Directed, argument-indexed edges between fields.
//!
//! Links live in the graph's link arena and are addressed by [`LinkId`].
//! A link is either connected (listed in the source's outputs *and* the
//! target's inputs) or disconnected (listed in neither). Disconnected links
//! keep their slot so they can be reconnected later.

use core::fmt;

use crate::field::FieldId;

/// Handle of a link in a [`crate::graph::FieldGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkId(pub(crate) u32);

impl LinkId {
    /// Arena index of the link.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Edge from a source field's output to one argument slot of a target field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldLink {
    pub(crate) source: FieldId,
    pub(crate) target: FieldId,
    pub(crate) arg: usize,
    pub(crate) connected: bool,
    /// The target has seen the source's value through this link.
    pub(crate) observed: bool,
}

impl FieldLink {
    pub(crate) fn new(source: FieldId, target: FieldId, arg: usize) -> Self {
        Self {
            source,
            target,
            arg,
            connected: false,
            observed: false,
        }
    }

    /// Field whose output feeds this link.
    pub fn source(&self) -> FieldId {
        self.source
    }

    /// Field whose input slot this link feeds.
    pub fn target(&self) -> FieldId {
        self.target
    }

    /// Argument slot on the target.
    pub fn arg(&self) -> usize {
        self.arg
    }

    /// Whether the link is listed in both adjacency lists.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the target has observed the source's value through this link.
    pub fn is_observed(&self) -> bool {
        self.observed
    }
}
