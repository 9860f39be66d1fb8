//! Error types shared across the scheduling engine.

use std::fmt;

use thiserror::Error;

use crate::graph::GraphError;
use crate::models::{PlanId, TaskId, TaskKey};

/// Which precedence graph a [`GraphError`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphScope {
    /// The plan-level graph.
    Plans,
    /// The task-level graph of one plan.
    Tasks(PlanId),
}

impl fmt::Display for GraphScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphScope::Plans => write!(f, "plan graph"),
            GraphScope::Tasks(plan) => write!(f, "task graph of plan {}", plan),
        }
    }
}

/// Errors that can occur while validating or scheduling plans.
///
/// Structural errors (bounds, duplicates, graph errors) abort a run before any
/// search starts. `InfeasibleSchedule` is produced during construction and is
/// reported through `SolveResult`, never returned from `Engine::solve`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("Duplicate task {task} in plan {plan}")]
    DuplicateTask { plan: PlanId, task: TaskId },
    #[error("Duplicate plan {0}")]
    DuplicatePlan(PlanId),
    #[error("Invalid task {task} in plan {plan}: {reason}")]
    InvalidTask {
        plan: PlanId,
        task: TaskId,
        reason: String,
    },
    #[error("{scope}: {source}")]
    Graph {
        scope: GraphScope,
        #[source]
        source: GraphError,
    },
    #[error("Task {0} is already committed")]
    AlreadyCommitted(TaskKey),
    #[error("Infeasible schedule: task {task} cannot be placed ({reason})")]
    InfeasibleSchedule { task: TaskKey, reason: String },
}

impl SchedulerError {
    pub(crate) fn graph(scope: GraphScope, source: GraphError) -> Self {
        SchedulerError::Graph { scope, source }
    }

    /// True if this error reports a precedence cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            SchedulerError::Graph {
                source: GraphError::Cycle { .. },
                ..
            }
        )
    }

    /// True if this error reports a successor id that does not resolve.
    pub fn is_unknown_reference(&self) -> bool {
        matches!(
            self,
            SchedulerError::Graph {
                source: GraphError::UnknownReference { .. },
                ..
            }
        )
    }
}
