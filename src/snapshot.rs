//! Portable snapshot of a field graph's committed values.
//!
//! A snapshot records one scalar per field: the same thing
//! [`FieldGraph::write`] hands a persistence layer. Topology is not stored.
//! The caller rebuilds fields and links in the same order (so the
//! [`FieldId`]s line up) and then calls [`GraphSnapshot::restore`], which goes
//! through [`FieldGraph::read`] and therefore propagates nothing.
//!
//! # no_std
//!
//! This module requires the `serde` feature and only needs `alloc`.

use alloc::string::String;
use alloc::vec::Vec;

use tracing::debug;

use crate::error::Result;
use crate::field::FieldId;
use crate::graph::FieldGraph;
use crate::step::ElementId;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Versioned scalar snapshot of a [`FieldGraph`].
///
/// # Example
///
/// ```rust,ignore
/// use fieldnet_core::snapshot::GraphSnapshot;
///
/// let snapshot = GraphSnapshot::from_graph(thought.graph());
/// let json = serde_json::to_string(&snapshot).unwrap();
/// let restored: GraphSnapshot = serde_json::from_str(&json).unwrap();
/// restored.restore(rebuilt.graph_mut())?;
/// ```
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct GraphSnapshot {
    /// Format version; [`SNAPSHOT_VERSION`] for new snapshots.
    pub version: u16,
    /// One record per field, in creation order.
    pub fields: Vec<FieldRecord>,
}

/// Committed state of a single field.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct FieldRecord {
    /// Field handle at snapshot time.
    pub field: FieldId,
    /// Owning element.
    pub owner: ElementId,
    /// Diagnostic label, checked on restore.
    pub label: String,
    /// Committed value; `None` for an uninitialised field.
    pub value: Option<f64>,
}

impl GraphSnapshot {
    /// Capture every field of `graph`.
    pub fn from_graph(graph: &FieldGraph) -> Self {
        let fields = graph
            .fields()
            .map(|f| FieldRecord {
                field: f.id(),
                owner: f.owner(),
                label: String::from(f.label()),
                value: f.try_value(),
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            fields,
        }
    }

    /// Number of recorded fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Record for a field, if present.
    pub fn find(&self, field: FieldId) -> Option<&FieldRecord> {
        self.fields.iter().find(|r| r.field == field)
    }

    /// Write every recorded value back into `graph` without propagation.
    /// Returns how many values were restored.
    ///
    /// Fails with [`crate::FieldError::UnknownField`] if a recorded field does not
    /// exist, and leaves uninitialised records untouched.
    pub fn restore(&self, graph: &mut FieldGraph) -> Result<usize> {
        for record in &self.fields {
            let field = graph.field(record.field)?;
            if field.label() != record.label {
                debug!(
                    field = %record.field,
                    expected = %record.label,
                    found = field.label(),
                    "label mismatch on restore"
                );
            }
        }
        let mut restored = 0;
        for record in &self.fields {
            if let Some(v) = record.value {
                graph.read(record.field, v)?;
                restored += 1;
            }
        }
        Ok(restored)
    }
}
