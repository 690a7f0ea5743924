//! Combinator kinds and their incremental update rules.
//!
//! A combinator never recomputes its full function when one input changes.
//! [`FieldKind::delta`] takes the changed argument's old and new value plus the
//! *current* values of the other arguments and returns the output delta.
//!
//! ```text
//! Sum            Δout = Δa
//! WeightedSum    Δout = Δa · w[a]
//! Scale(s)       Δout = Δa · s
//! Multiplication Δout = Δa · b
//! others         Δout = f(.., a_new, ..) − f(.., a_old, ..)
//! ```
//!
//! Because a source commits its new value before it notifies its outputs,
//! "the current value of the other argument" is exactly what the target has
//! already observed. Two inputs of a product changing in the same pass
//! therefore produce `Δa·b_old + Δb·a_new`, the exact product difference,
//! without any explicit correction term.
//!
//! # Absent inputs
//!
//! An absent (uninitialised or disconnected) argument makes every fixed-arity
//! combinator absent too: `evaluate` returns `None` and the field stays
//! uninitialised instead of computing with a fabricated zero. Sums treat absent
//! inputs as contributing nothing. An absent result counts as `0` on either
//! side of a delta, so the first value a combinator sees is its full value and
//! a removed input takes its whole contribution with it.
//!
//! # Division
//!
//! A denominator of exactly `0` yields `0`. Scope-normalised statistics
//! legitimately divide by zero before any evidence has been counted.

use alloc::vec::Vec;

use tracing::trace;

// ─── Comparison ─────────────────────────────────────────────────────────────

/// Comparison used by threshold fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Comparison {
    /// `x > t`
    Above,
    /// `x < t`
    Below,
    /// `x <= t`
    BelowOrEqual,
    /// `|x| > t`
    AboveAbs,
}

impl Comparison {
    /// Whether `x` satisfies the comparison against threshold `t`.
    pub fn holds(self, x: f64, t: f64) -> bool {
        match self {
            Comparison::Above => x > t,
            Comparison::Below => x < t,
            Comparison::BelowOrEqual => x <= t,
            Comparison::AboveAbs => x.abs() > t,
        }
    }
}

// ─── ActivationFn ───────────────────────────────────────────────────────────

/// Unary function applied by [`FieldKind::Function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivationFn {
    /// `x`
    Identity,
    /// `1 / (1 + e^-x)`
    Sigmoid,
    /// `tanh(x)`
    Tanh,
    /// `max(0, x)`
    Relu,
    /// `max(0, tanh(x))`
    LimitedTanh,
    /// `e^x`
    Exp,
}

impl ActivationFn {
    /// Apply the function.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            ActivationFn::Identity => x,
            ActivationFn::Sigmoid => 1.0 / (1.0 + libm::exp(-x)),
            ActivationFn::Tanh => libm::tanh(x),
            ActivationFn::Relu => x.max(0.0),
            ActivationFn::LimitedTanh => libm::tanh(x).max(0.0),
            ActivationFn::Exp => libm::exp(x),
        }
    }
}

// ─── BinaryFn ───────────────────────────────────────────────────────────────

/// Binary function applied by [`FieldKind::BiFunction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryFn {
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
    /// `(a + b) / 2`
    Mean,
}

impl BinaryFn {
    /// Apply the function.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryFn::Min => a.min(b),
            BinaryFn::Max => a.max(b),
            BinaryFn::Mean => 0.5 * (a + b),
        }
    }
}

// ─── FieldKind ──────────────────────────────────────────────────────────────

/// Closed set of field kinds. Every variant supplies an incremental rule.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    /// Plain storage cell written by callers; accepts no inputs.
    Input,
    /// Live running total of any number of inputs.
    Sum,
    /// `Σ w[i] · x[i]`; arity equals the number of weights.
    WeightedSum {
        /// Weight per argument slot.
        weights: Vec<f64>,
    },
    /// `a − b`
    Subtraction,
    /// `a · b`
    Multiplication,
    /// `a / b`, or `0` when `b == 0`.
    Division,
    /// `f(x)`
    Function(ActivationFn),
    /// `f(a, b)`
    BiFunction(BinaryFn),
    /// `1.0` when the comparison holds, else `0.0`.
    Threshold {
        /// Fixed threshold.
        threshold: f64,
        /// Comparison against the threshold.
        comparison: Comparison,
    },
    /// `s · x`
    Scale(f64),
    /// `1 − x`
    Invert,
}

impl FieldKind {
    /// Short kind name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Input => "input",
            FieldKind::Sum => "sum",
            FieldKind::WeightedSum { .. } => "weighted-sum",
            FieldKind::Subtraction => "subtraction",
            FieldKind::Multiplication => "multiplication",
            FieldKind::Division => "division",
            FieldKind::Function(_) => "function",
            FieldKind::BiFunction(_) => "bi-function",
            FieldKind::Threshold { .. } => "threshold",
            FieldKind::Scale(_) => "scale",
            FieldKind::Invert => "invert",
        }
    }

    /// Number of argument slots, or `None` for variadic kinds.
    pub fn arity(&self) -> Option<usize> {
        match self {
            FieldKind::Input => Some(0),
            FieldKind::Sum => None,
            FieldKind::WeightedSum { weights } => Some(weights.len()),
            FieldKind::Subtraction
            | FieldKind::Multiplication
            | FieldKind::Division
            | FieldKind::BiFunction(_) => Some(2),
            FieldKind::Function(_)
            | FieldKind::Threshold { .. }
            | FieldKind::Scale(_)
            | FieldKind::Invert => Some(1),
        }
    }

    /// Full, non-incremental evaluation.
    ///
    /// `args` is indexed by argument slot (input order for [`FieldKind::Sum`]).
    /// Missing slots count as absent.
    pub fn evaluate(&self, args: &[Option<f64>]) -> Option<f64> {
        let arg = |i: usize| args.get(i).copied().flatten();
        match self {
            FieldKind::Input => None,
            FieldKind::Sum => sum_present(args.iter().copied()),
            FieldKind::WeightedSum { weights } => sum_present(
                weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| arg(i).map(|x| x * w)),
            ),
            FieldKind::Subtraction => Some(arg(0)? - arg(1)?),
            FieldKind::Multiplication => Some(arg(0)? * arg(1)?),
            FieldKind::Division => {
                let num = arg(0)?;
                let den = arg(1)?;
                if den == 0.0 {
                    trace!(num, "zero denominator, division yields 0");
                    Some(0.0)
                } else {
                    Some(num / den)
                }
            }
            FieldKind::Function(f) => Some(f.apply(arg(0)?)),
            FieldKind::BiFunction(f) => Some(f.apply(arg(0)?, arg(1)?)),
            FieldKind::Threshold {
                threshold,
                comparison,
            } => Some(if comparison.holds(arg(0)?, *threshold) {
                1.0
            } else {
                0.0
            }),
            FieldKind::Scale(s) => Some(arg(0)? * s),
            FieldKind::Invert => Some(1.0 - arg(0)?),
        }
    }

    /// Output delta when argument `arg` moves from `old` to `new`.
    ///
    /// `other(i)` yields the current value of argument `i`; it is never called
    /// for `arg` itself. Returns `None` when the output is absent both before
    /// and after the change.
    pub fn delta<F>(&self, arg: usize, old: Option<f64>, new: Option<f64>, other: F) -> Option<f64>
    where
        F: Fn(usize) -> Option<f64>,
    {
        if old.is_none() && new.is_none() {
            return None;
        }
        let change = new.unwrap_or(0.0) - old.unwrap_or(0.0);
        match self {
            FieldKind::Input => None,
            FieldKind::Sum => Some(change),
            FieldKind::WeightedSum { weights } => weights.get(arg).map(|w| change * w),
            FieldKind::Scale(s) => Some(change * s),
            FieldKind::Multiplication => other(1 - arg.min(1)).map(|b| change * b),
            _ => self.delta_by_evaluation(&[arg], old, new, other),
        }
    }

    /// Output delta when every argument in `args` is fed by the same source
    /// and all of them move from `old` to `new` together.
    ///
    /// A single argument is [`FieldKind::delta`]. With several, linear kinds
    /// scale the change by the combined weight and every other kind is
    /// evaluated with all shared slots moved at once, so `a · a` yields
    /// `new² − old²` rather than twice `Δa · a`.
    pub fn delta_shared<F>(
        &self,
        args: &[usize],
        old: Option<f64>,
        new: Option<f64>,
        other: F,
    ) -> Option<f64>
    where
        F: Fn(usize) -> Option<f64>,
    {
        match args {
            [] => None,
            [arg] => self.delta(*arg, old, new, other),
            _ => {
                if old.is_none() && new.is_none() {
                    return None;
                }
                let change = new.unwrap_or(0.0) - old.unwrap_or(0.0);
                match self {
                    FieldKind::Input => None,
                    FieldKind::Sum => Some(change * args.len() as f64),
                    FieldKind::WeightedSum { weights } => {
                        Some(change * args.iter().filter_map(|&a| weights.get(a)).sum::<f64>())
                    }
                    _ => self.delta_by_evaluation(args, old, new, other),
                }
            }
        }
    }

    /// `f(args with changed = new) − f(args with changed = old)` for
    /// fixed-arity kinds.
    fn delta_by_evaluation<F>(
        &self,
        changed: &[usize],
        old: Option<f64>,
        new: Option<f64>,
        other: F,
    ) -> Option<f64>
    where
        F: Fn(usize) -> Option<f64>,
    {
        let arity = self.arity().unwrap_or(0).min(2);
        if changed.iter().any(|&a| a >= arity) {
            return None;
        }
        let mut before = [None; 2];
        let mut after = [None; 2];
        for i in 0..arity {
            if changed.contains(&i) {
                before[i] = old;
                after[i] = new;
            } else {
                let v = other(i);
                before[i] = v;
                after[i] = v;
            }
        }
        let b = self.evaluate(&before[..arity]);
        let a = self.evaluate(&after[..arity]);
        if a.is_none() && b.is_none() {
            return None;
        }
        Some(a.unwrap_or(0.0) - b.unwrap_or(0.0))
    }
}

fn sum_present<I: Iterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    values.flatten().fold(None, |acc, x| Some(acc.unwrap_or(0.0) + x))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
