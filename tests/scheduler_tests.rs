//! Integration tests for the phase-ordered step queue and the drain loop.

use fieldnet_core::{
    ElementId, FieldError, FieldKind, FieldSpec, Phase, Result, SortBy, Step, StepAction,
    StepHandler, Thought, UpdateMode,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

/// Records every task step it executes and runs scripted follow-ups.
#[derive(Default)]
struct Script {
    log: Vec<(ElementId, Phase, u32)>,
    /// `(trigger task, element, phase, new task)` enqueued when the trigger runs.
    follow_ups: Vec<(u32, ElementId, Phase, u32)>,
    fail_on: Option<u32>,
}

impl StepHandler for Script {
    fn execute(&mut self, thought: &mut Thought, step: &Step) -> Result<()> {
        let StepAction::Task(id) = step.action else {
            return Ok(());
        };
        self.log.push((step.element, step.phase, id));
        if self.fail_on == Some(id) {
            return Err(FieldError::Task(format!("task {} failed", id)));
        }
        for &(trigger, element, phase, task) in &self.follow_ups {
            if trigger == id {
                thought.enqueue_task(element, phase, task);
            }
        }
        Ok(())
    }
}

fn tasks(log: &[(ElementId, Phase, u32)]) -> Vec<u32> {
    log.iter().map(|&(_, _, id)| id).collect()
}

// ─── ordering ────────────────────────────────────────────────────────────────

#[test]
fn test_earlier_phase_inserted_late_runs_next() {
    let mut t = Thought::default();
    let e = t.new_element();
    t.enqueue_task(e, Phase::Training, 1);
    t.enqueue_task(e, Phase::Post, 2);

    let mut script = Script {
        follow_ups: vec![(1, e, Phase::Init, 3), (3, e, Phase::Post, 4)],
        ..Script::default()
    };
    t.drain(&mut script).unwrap();
    assert_eq!(tasks(&script.log), vec![1, 3, 2, 4]);
}

#[test]
fn test_phase_dominates_firing() {
    let mut t = Thought::default();
    let early = t.new_element();
    let late = t.new_element();
    t.enqueue_task(early, Phase::Anneal, 1);
    t.enqueue_task(late, Phase::Counting, 2);
    t.fire(early);

    let mut script = Script::default();
    t.drain(&mut script).unwrap();
    assert_eq!(tasks(&script.log), vec![2, 1]);
}

#[test]
fn test_firing_order_within_phase() {
    let mut t = Thought::default();
    let a = t.new_element();
    let b = t.new_element();
    let c = t.new_element();
    for (i, e) in [a, b, c].into_iter().enumerate() {
        t.enqueue_task(e, Phase::Linking, i as u32);
    }
    t.fire(c);
    t.fire(a);

    let mut script = Script::default();
    t.drain(&mut script).unwrap();
    // c fired first, then a; b never fired.
    assert_eq!(tasks(&script.log), vec![2, 0, 1]);
}

#[test]
fn test_sorted_field_steps_run_largest_first() {
    let mut t = Thought::default();
    let e = t.new_element();
    let spec = |label: &str| {
        FieldSpec::new(e, label).mode(UpdateMode::queued_by(Phase::Training, SortBy::Pending))
    };
    let small = t.graph_mut().add_field(spec("small"), FieldKind::Input);
    let large = t.graph_mut().add_field(spec("large"), FieldKind::Input);
    let unsorted = t.graph_mut().add_field(
        FieldSpec::new(e, "unsorted").mode(UpdateMode::queued(Phase::Training)),
        FieldKind::Input,
    );

    t.receive_update(unsorted, 1.0).unwrap();
    t.receive_update(small, 0.2).unwrap();
    t.receive_update(large, 0.1).unwrap();
    // Re-delivery refreshes the sort value of the queued step.
    t.receive_update(large, 0.5).unwrap();

    let order: Vec<StepAction> = t.queue().iter().map(|s| s.action).collect();
    assert_eq!(
        order,
        vec![
            StepAction::ApplyField(large),
            StepAction::ApplyField(small),
            StepAction::ApplyField(unsorted),
        ]
    );

    let report = t.process().unwrap();
    assert_eq!(report.field_steps, 3);
    assert!((t.graph().value(large).unwrap() - 0.6).abs() < 1e-12);
}

// ─── idempotence and failure ─────────────────────────────────────────────────

#[test]
fn test_duplicate_task_runs_once() {
    let mut t = Thought::default();
    let e = t.new_element();
    assert!(t.enqueue_task(e, Phase::Template, 9));
    assert!(!t.enqueue_task(e, Phase::Template, 9));
    assert!(t.enqueue_task(e, Phase::Post, 9));

    let mut script = Script::default();
    let report = t.drain(&mut script).unwrap();
    assert_eq!(report.task_steps, 2);
    assert_eq!(tasks(&script.log), vec![9, 9]);
}

#[test]
fn test_failure_keeps_partial_effects() {
    let mut t = Thought::default();
    let e = t.new_element();
    let f = t.graph_mut().add_field(
        FieldSpec::new(e, "f").mode(UpdateMode::queued(Phase::Init)),
        FieldKind::Input,
    );
    t.set_value(f, 4.0).unwrap();
    t.enqueue_task(e, Phase::Inference, 1);
    t.enqueue_task(e, Phase::Post, 2);

    let mut script = Script {
        fail_on: Some(1),
        ..Script::default()
    };
    let err = t.drain(&mut script).unwrap_err();
    match &err {
        FieldError::QueueStepFailure { phase, element, .. } => {
            assert_eq!(*phase, Phase::Inference);
            assert_eq!(*element, e);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(matches!(err.root_cause(), FieldError::Task(_)));
    assert_eq!(t.graph().value(f).unwrap(), 4.0);
    assert!(t.queue().is_empty());

    // The thought is usable again afterwards.
    t.enqueue_task(e, Phase::Post, 5);
    let mut script = Script::default();
    t.drain(&mut script).unwrap();
    assert_eq!(tasks(&script.log), vec![5]);
}

#[test]
fn test_error_source_chain() {
    use std::error::Error as _;

    let mut t = Thought::default();
    let e = t.new_element();
    t.enqueue_task(e, Phase::Init, 1);
    let err = t.process().unwrap_err();
    let source = err.source().expect("step failure carries its cause");
    assert!(source.to_string().contains("task failed"), "{}", source);
}
