//! Max-min fair sharing of resource capacities.
//!
//! The solver is a pure function from a [`SharingProblem`] to an [`Allocation`]. A problem consists of _constraints_
//! (one per resource capacity, e.g. a CPU, a link or the read bandwidth of a disk) and _variables_ (one per activity
//! claiming resources). Each variable has a set of _elements_ which state how much of a constraint the variable
//! consumes per unit of its rate. For example, a communication crossing three links has three elements with
//! consumption 1, while a parallel task consuming 2 GFlops on one host and 1 GFlops on another has elements with
//! consumption `2e9` and `1e9` and its rate is expressed as a fraction of the whole task per second.
//!
//! The computed rates satisfy:
//!
//! - for each [`Shared`](crate::SharingPolicy::Shared) constraint, the sum of `consumption * rate` over its elements
//!   does not exceed the constraint bound;
//! - for each [`FatPipe`](crate::SharingPolicy::FatPipe) constraint, every single `consumption * rate` does not
//!   exceed the bound;
//! - no variable exceeds its own bound;
//! - the allocation is weighted max-min fair: rates are inversely proportional to the variable penalties on each
//!   bottleneck, and no rate can be increased without decreasing a rate which is already smaller or equal
//!   (after penalty weighting).
//!
//! The algorithm is the classic water-filling: repeatedly find the most constrained resource, fix the rates of the
//! variables crossing it, subtract their consumption from the other constraints and continue with the rest.
//!
//! Ties are broken by index: constraints saturating at the same level (within the precision) are saturated together
//! and their variables are fixed in ascending variable index. The result depends only on the problem content, so
//! identical problems always produce identical allocations.

mod maxmin;

use serde::{Deserialize, Serialize};

pub use maxmin::solve;

/// Policy used to share a constraint between its variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SharingPolicy {
    /// The sum of consumptions must not exceed the bound (fair sharing).
    #[default]
    Shared,
    /// Each consumption is individually limited by the bound, e.g. a backbone that does not saturate.
    FatPipe,
}

/// A capacity limit in a sharing problem.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConstraintSpec {
    /// Capacity of the constraint. A zero bound blocks all variables crossing it.
    pub bound: f64,
    /// Sharing policy.
    pub policy: SharingPolicy,
    /// Maximum number of variables allowed to use the constraint simultaneously.
    pub concurrency_limit: Option<usize>,
}

impl ConstraintSpec {
    /// Creates shared constraint with the given bound.
    pub fn shared(bound: f64) -> Self {
        Self {
            bound,
            policy: SharingPolicy::Shared,
            concurrency_limit: None,
        }
    }

    /// Creates fat-pipe constraint with the given bound.
    pub fn fat_pipe(bound: f64) -> Self {
        Self {
            bound,
            policy: SharingPolicy::FatPipe,
            concurrency_limit: None,
        }
    }

    /// Sets the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

/// Consumption of a constraint by a variable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Element {
    /// Index of the constraint in [`SharingProblem::constraints`].
    pub constraint: usize,
    /// Amount of the constraint capacity consumed per unit of the variable rate.
    pub consumption: f64,
}

/// A claim on one or several constraints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableSpec {
    /// Sharing penalty. On a common bottleneck the rates are inversely proportional to the penalties.
    /// A non-positive penalty disables the variable (its rate is zero).
    pub penalty: f64,
    /// Optional upper bound of the rate.
    pub bound: Option<f64>,
    /// Consumed constraints.
    pub elements: Vec<Element>,
}

impl VariableSpec {
    /// Creates variable with penalty 1 and no bound.
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            penalty: 1.,
            bound: None,
            elements,
        }
    }

    /// Sets the sharing penalty.
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    /// Sets the rate bound.
    pub fn with_bound(mut self, bound: f64) -> Self {
        self.bound = Some(bound);
        self
    }
}

/// Input of the solver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SharingProblem {
    /// Constraints (resource capacities).
    pub constraints: Vec<ConstraintSpec>,
    /// Variables (claims). The index order is the admission order for concurrency limits.
    pub variables: Vec<VariableSpec>,
    /// Relative precision used to detect saturation and ties.
    pub precision: f64,
}

impl SharingProblem {
    /// Creates empty problem with the given precision.
    pub fn new(precision: f64) -> Self {
        Self {
            constraints: Vec::new(),
            variables: Vec::new(),
            precision,
        }
    }

    /// Adds constraint and returns its index.
    pub fn add_constraint(&mut self, constraint: ConstraintSpec) -> usize {
        self.constraints.push(constraint);
        self.constraints.len() - 1
    }

    /// Adds variable and returns its index.
    pub fn add_variable(&mut self, variable: VariableSpec) -> usize {
        self.variables.push(variable);
        self.variables.len() - 1
    }
}

/// Output of the solver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Allocation {
    /// Rate of each variable, `f64::INFINITY` for enabled variables which consume nothing and have no bound.
    pub rates: Vec<f64>,
    /// Whether the variable was held back by a concurrency limit.
    pub staged: Vec<bool>,
    /// Consumed capacity of each constraint.
    pub usage: Vec<f64>,
}

/// Violation found when checking an allocation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AllocationError {
    /// Constraint is used beyond its bound.
    #[error("constraint {constraint} is oversubscribed: {usage} > {bound}")]
    Oversubscribed {
        /// Constraint index.
        constraint: usize,
        /// Consumed capacity.
        usage: f64,
        /// Capacity.
        bound: f64,
    },
    /// Variable rate exceeds its bound.
    #[error("variable {variable} exceeds its bound: {rate} > {bound}")]
    BoundExceeded {
        /// Variable index.
        variable: usize,
        /// Assigned rate.
        rate: f64,
        /// Bound of the variable.
        bound: f64,
    },
    /// Negative or NaN rate.
    #[error("variable {variable} has invalid rate {rate}")]
    InvalidRate {
        /// Variable index.
        variable: usize,
        /// Assigned rate.
        rate: f64,
    },
}

impl Allocation {
    /// Checks that the allocation respects all capacities and bounds of the problem.
    pub fn check(&self, problem: &SharingProblem) -> Result<(), AllocationError> {
        for (variable, &rate) in self.rates.iter().enumerate() {
            if rate.is_nan() || rate < 0. {
                return Err(AllocationError::InvalidRate { variable, rate });
            }
            if let Some(bound) = problem.variables[variable].bound {
                if rate > bound * (1. + problem.precision) + problem.precision {
                    return Err(AllocationError::BoundExceeded { variable, rate, bound });
                }
            }
        }
        for (constraint, spec) in problem.constraints.iter().enumerate() {
            let usage = self.usage[constraint];
            if usage > spec.bound * (1. + problem.precision) + problem.precision {
                return Err(AllocationError::Oversubscribed {
                    constraint,
                    usage,
                    bound: spec.bound,
                });
            }
        }
        Ok(())
    }
}
