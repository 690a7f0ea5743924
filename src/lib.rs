//! # fieldnet-core
//!
//! Incrementally maintained numeric fields for probabilistic-logic networks.
//!
//! ---
//!
//! ## Fields, not recomputation
//!
//! A network of neurons and synapses keeps dozens of derived numbers per node:
//! net input, activation, evidence counts, normalised statistics. Recomputing
//! them from scratch on every change is quadratic in fan-in. Here every derived
//! number is a [`Field`] whose value is kept current by **deltas**: when an
//! input changes from `old` to `new`, each dependent combinator derives its own
//! output delta from that change and the current values of its other inputs,
//! and forwards it.
//!
//! Two mechanisms keep the work bounded:
//!
//! **Propagation floor.** An initialised field whose accumulated delta is
//! smaller than the tolerance does not change and does not notify anyone. The
//! delta stays pending and combines with later deltas, so feedback cycles
//! settle instead of oscillating forever.
//!
//! **Phase-ordered queue.** Fields may defer their updates to a step in the
//! unit of work's queue. Steps run by phase, then by element firing time, then
//! by caller priority, then by insertion order, and one field never has two
//! steps queued at once.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! set_value ─▶ Field ─(Δ)─▶ FieldLink ─▶ combinator rule ─▶ Field ─▶ …
//!                 │                                            │
//!            queued mode                                  listeners
//!                 ▼                                            ▼
//!   Queue (phase, fired, sort, created, seq) ─▶ Thought::drain ─▶ StepHandler
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`graph`] | [`FieldGraph`], [`FieldSpec`] | Field/link arena, wiring, delta propagation, listeners |
//! | [`field`] | [`Field`], [`FieldId`], [`UpdateMode`] | Per-field value, pending delta and adjacency |
//! | [`link`] | [`FieldLink`], [`LinkId`] | Argument-indexed edges with connect/disconnect lifecycle |
//! | [`combinator`] | [`FieldKind`], [`ActivationFn`], [`BinaryFn`], [`Comparison`] | Closed set of combinators and their incremental rules |
//! | [`policy`] | [`PropagationPolicy`] | Tolerance floor and range gates |
//! | [`event`] | [`EventKind`], [`FieldEvent`] | Bounded observer lists for truth transitions |
//! | [`phase`] | [`Phase`] | Ordered pipeline phases |
//! | [`step`] | [`Step`], [`StepAction`], [`ElementId`] | Steps and their total order |
//! | [`queue`] | [`Queue`] | Deduplicated, ordered step set with element clock |
//! | [`thought`] | [`Thought`], [`StepHandler`] | Unit of work and its drain loop |
//! | [`config`] | [`EngineConfig`] | Tolerance, truth threshold, step budget |
//! | [`snapshot`] | `GraphSnapshot` | Versioned value snapshot (requires `serde` feature) |
//!
//! ## Example
//!
//! ```rust
//! use fieldnet_core::{Comparison, Thought};
//!
//! let mut thought = Thought::default();
//! let neuron = thought.new_element();
//! let (graph, queue) = thought.split();
//!
//! let a = graph.input(neuron, "a");
//! let b = graph.input(neuron, "b");
//! let net = graph.weighted_sum(neuron, "net", &[(a, 3.0), (b, 1.0)], queue)?;
//! let fired = graph.threshold(neuron, "fired", net, 0.0, Comparison::Above, queue)?;
//!
//! thought.set_value(a, 2.0)?;
//! thought.set_value(b, 1.0)?;
//! assert_eq!(thought.graph().value(net)?, 7.0);
//!
//! thought.set_value(a, 4.0)?;
//! assert_eq!(thought.graph().value(net)?, 11.0);
//! assert_eq!(thought.graph().value(fired)?, 1.0);
//! # Ok::<(), fieldnet_core::FieldError>(())
//! ```
//!
//! ## `no_std`
//!
//! This crate is `#![no_std]` by default and needs only `alloc`. Enable the
//! `std` feature to implement `std::error::Error` through `thiserror` and to
//! let `tracing` use the standard library. Enable the `serde` feature for
//! serialisable configuration, identifiers and [`snapshot`].
//!
//! ## Logging
//!
//! Diagnostics go through `tracing`. The crate never installs a subscriber.
//!
//! ## License
//!
//! Business Source License 1.1. Free for evaluation and non-production use.
//! Commercial production use requires a license from Flout Labs.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod combinator;
pub mod config;
pub mod error;
pub mod event;
pub mod field;
pub mod graph;
pub mod link;
pub mod phase;
pub mod policy;
pub mod queue;
pub mod step;
pub mod thought;

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub mod snapshot;

pub use combinator::{ActivationFn, BinaryFn, Comparison, FieldKind};
pub use config::{EngineConfig, DEFAULT_TOLERANCE, DEFAULT_TRUTH_THRESHOLD};
pub use error::{FieldError, Result};
pub use event::{EventKind, FieldEvent, ListenerId, MAX_LISTENERS};
pub use field::{Field, FieldId, QueueSpec, SortBy, UpdateMode};
pub use graph::{FieldGraph, FieldSpec};
pub use link::{FieldLink, LinkId};
pub use phase::Phase;
pub use policy::PropagationPolicy;
pub use queue::{ElementTimes, Queue, QueueState};
pub use step::{ElementId, Step, StepAction};
pub use thought::{DrainReport, NoTasks, StepHandler, Thought};
