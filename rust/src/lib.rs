//! Resource-constrained scheduling of multi-task plans.
//!
//! Plans are DAGs of tasks that share renewable resources of bounded
//! capacity over a planning window. [`Engine::solve`] validates the input,
//! orders it topologically, builds a schedule on a sweep-line resource
//! timeline and runs a tabu search to repair infeasible attempts.

pub mod bounds;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod logging;
pub mod models;
pub mod objective;
pub mod ordering;
pub mod problem;
pub mod scheduler;

pub use config::{
    Capacities, EngineConfig, FrontierMode, PlacementPolicy, ReferencePolicy, SearchBudget,
};
pub use engine::{Engine, SolveResult};
pub use error::{GraphScope, SchedulerError};
pub use execution::{ExecutionError, Executor, TaskAction};
pub use graph::{build_adjacency, GraphError, GraphNode, PrecedenceGraph};
pub use models::{
    Plan, PlanId, ResourceId, Schedule, ScheduleAssignment, Task, TaskId, TaskKey, Time,
};
pub use objective::{Cost, Criterion, ObjectiveEvaluator, WeightedCriterion};
pub use ordering::{sort, OrderedNode, TopologicalOrder};
pub use problem::{Problem, Violation};
pub use scheduler::{CancelToken, Perturbation, SchedulerListener, SolutionLog, Termination};
