//! Unit of work: one graph, one queue, one drain loop.
//!
//! A [`Thought`] owns its [`FieldGraph`] and [`Queue`] outright and shares no
//! state with other thoughts, so independent thoughts may run on separate
//! threads. Field steps are executed by the graph itself; task steps are
//! handed to the caller's [`StepHandler`].
//!
//! ```text
//!            ┌────────── Idle ◀─────────────┐
//!   drain()  │                              │ queue empty / error
//!            ▼                              │
//!        Draining: dispatch events → pop least step → execute ─┘
//!                        ▲                      │
//!                        └── steps enqueued ────┘
//! ```

use alloc::boxed::Box;
use alloc::format;

use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::{FieldError, Result};
use crate::event::FieldEvent;
use crate::field::FieldId;
use crate::graph::FieldGraph;
use crate::phase::Phase;
use crate::queue::{Queue, QueueState};
use crate::step::{ElementId, Step, StepAction};

// ─── StepHandler ────────────────────────────────────────────────────────────

/// Caller hooks invoked by [`Thought::drain`].
pub trait StepHandler {
    /// Execute a [`StepAction::Task`] step.
    fn execute(&mut self, thought: &mut Thought, step: &Step) -> Result<()>;

    /// React to a listener event. The default ignores it.
    fn on_event(&mut self, thought: &mut Thought, event: &FieldEvent) -> Result<()> {
        let _ = (thought, event);
        Ok(())
    }
}

/// Handler for thoughts that only schedule field steps. Any task step fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTasks;

impl StepHandler for NoTasks {
    fn execute(&mut self, _thought: &mut Thought, step: &Step) -> Result<()> {
        Err(FieldError::Task(format!(
            "no handler for {:?} of element {}",
            step.action, step.element
        )))
    }
}

// ─── DrainReport ────────────────────────────────────────────────────────────

/// Counts from one successful drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Steps executed.
    pub steps: u64,
    /// Of which field steps.
    pub field_steps: u64,
    /// Of which task steps.
    pub task_steps: u64,
    /// Listener events delivered to the handler.
    pub events: u64,
}

// ─── Thought ────────────────────────────────────────────────────────────────

/// A unit of work owning a field graph and its step queue.
#[derive(Debug, Default)]
pub struct Thought {
    graph: FieldGraph,
    queue: Queue,
}

impl Thought {
    /// Construct an empty unit of work.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            graph: FieldGraph::new(config),
            queue: Queue::new(),
        }
    }

    /// The field graph.
    pub fn graph(&self) -> &FieldGraph {
        &self.graph
    }

    /// The field graph, mutably.
    pub fn graph_mut(&mut self) -> &mut FieldGraph {
        &mut self.graph
    }

    /// The step queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The step queue, mutably.
    pub fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }

    /// Borrow graph and queue together, as graph operations that may schedule
    /// work require.
    pub fn split(&mut self) -> (&mut FieldGraph, &mut Queue) {
        (&mut self.graph, &mut self.queue)
    }

    /// Allocate and register a fresh element.
    pub fn new_element(&mut self) -> ElementId {
        self.queue.new_element()
    }

    /// Mark an element as fired. See [`Queue::fire_element`].
    pub fn fire(&mut self, element: ElementId) -> u64 {
        self.queue.fire_element(element)
    }

    /// Set a field's value, scheduling or propagating as its mode requires.
    pub fn set_value(&mut self, field: FieldId, v: f64) -> Result<()> {
        self.graph.set_value(field, v, &mut self.queue)
    }

    /// Send a delta to a field.
    pub fn receive_update(&mut self, field: FieldId, delta: f64) -> Result<()> {
        self.graph.receive_update(field, delta, &mut self.queue)
    }

    /// Schedule a step. Returns `false` if an equal step is already queued.
    pub fn enqueue(
        &mut self,
        element: ElementId,
        phase: Phase,
        action: StepAction,
        sort: Option<f64>,
    ) -> bool {
        self.queue.enqueue(element, phase, action, sort)
    }

    /// Schedule a caller task without priority.
    pub fn enqueue_task(&mut self, element: ElementId, phase: Phase, task: u32) -> bool {
        self.enqueue(element, phase, StepAction::Task(task), None)
    }

    /// Tear down every field of an element and cancel its queued steps.
    pub fn remove_element(&mut self, element: ElementId) -> Result<usize> {
        let removed = self.graph.disconnect_owner(element, &mut self.queue)?;
        let stale: alloc::vec::Vec<Step> =
            self.queue.iter().filter(|s| s.element == element).collect();
        for step in stale {
            self.queue.cancel(step.element, step.phase, step.action);
        }
        Ok(removed)
    }

    /// Execute steps in order until the queue is empty.
    ///
    /// The least step is re-queried after every execution, so steps enqueued
    /// while draining run in their proper place. On failure the error is
    /// wrapped in [`FieldError::QueueStepFailure`], the remaining queue is
    /// discarded and the thought returns to [`QueueState::Idle`]; effects of
    /// steps that already ran are kept.
    pub fn drain<H: StepHandler>(&mut self, handler: &mut H) -> Result<DrainReport> {
        self.queue.begin_drain()?;
        let result = self.run(handler);
        self.queue.end_drain();
        match &result {
            Ok(report) => debug!(
                steps = report.steps,
                fields = report.field_steps,
                tasks = report.task_steps,
                events = report.events,
                "drain complete"
            ),
            Err(err) => {
                let discarded = self.queue.len();
                warn!(error = %err, discarded, "drain aborted");
                self.queue.clear();
            }
        }
        result
    }

    /// Drain a thought that schedules only field steps.
    pub fn process(&mut self) -> Result<DrainReport> {
        self.drain(&mut NoTasks)
    }

    /// Whether a drain is in progress.
    pub fn is_draining(&self) -> bool {
        self.queue.state() == QueueState::Draining
    }

    fn run<H: StepHandler>(&mut self, handler: &mut H) -> Result<DrainReport> {
        let limit = self.graph.config().max_steps_per_drain;
        let mut report = DrainReport::default();
        loop {
            self.dispatch_events(handler, &mut report)?;
            if self.queue.is_empty() {
                return Ok(report);
            }
            if let Some(limit) = limit {
                if report.steps >= limit {
                    return Err(FieldError::StepBudgetExceeded { limit });
                }
            }
            let Some(step) = self.queue.pop() else {
                return Ok(report);
            };
            report.steps += 1;
            trace!(element = %step.element, phase = %step.phase, seq = step.seq, "executing step");

            let outcome = match step.action {
                StepAction::ApplyField(field) => {
                    report.field_steps += 1;
                    self.graph.apply_pending(field, &mut self.queue).map(|_| ())
                }
                StepAction::Task(_) => {
                    report.task_steps += 1;
                    handler.execute(self, &step)
                }
            };
            outcome.map_err(|cause| FieldError::QueueStepFailure {
                phase: step.phase,
                element: step.element,
                cause: Box::new(cause),
            })?;
        }
    }

    fn dispatch_events<H: StepHandler>(
        &mut self,
        handler: &mut H,
        report: &mut DrainReport,
    ) -> Result<()> {
        while self.graph.has_events() {
            for event in self.graph.take_events() {
                report.events += 1;
                handler.on_event(self, &event)?;
            }
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
