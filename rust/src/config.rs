//! Configuration types for the scheduling engine.

use rustc_hash::FxHashMap;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::models::{ResourceId, Time};
use crate::objective::{Criterion, WeightedCriterion};

/// How `sort` labels each node's frontier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontierMode {
    /// Depth-first visit depth; a node reached again keeps the depth of its
    /// last visit. Cheap, approximate.
    #[default]
    DfsDepth,
    /// Longest path (in edges) from any root. Exact.
    LongestPath,
}

/// What to do with a successor id that does not resolve in its node set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Skip the edge and log it at CHECKS verbosity.
    #[default]
    Warn,
    /// Fail the run with an unknown-reference error.
    Strict,
}

/// Lower bound the builder applies on a task's resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlacementPolicy {
    /// Earliest event-aligned start with enough residual capacity; may fill
    /// gaps left before already committed work.
    #[default]
    Backfill,
    /// Never start before the last committed end on the resource.
    Append,
}

/// Per-resource capacity, uniform unless overridden.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capacities {
    pub default: u32,
    pub overrides: FxHashMap<ResourceId, u32>,
}

impl Capacities {
    /// Same capacity for every resource.
    pub fn uniform(default: u32) -> Self {
        Self {
            default,
            overrides: FxHashMap::default(),
        }
    }

    /// Capacity of `resource`.
    pub fn of(&self, resource: ResourceId) -> u32 {
        self.overrides
            .get(&resource)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Limits on the tabu search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchBudget {
    /// Maximum number of search iterations (one branching round each).
    pub max_iterations: usize,
    /// Maximum number of branch evaluations over the whole run.
    pub max_moves: usize,
    /// Wall-clock limit, checked once per iteration.
    pub time_limit: Option<Duration>,
    /// Iterations without improvement tolerated once a complete feasible
    /// schedule exists (0 = stop at the first one).
    pub improvement_iterations: usize,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_moves: 2_000,
            time_limit: None,
            improvement_iterations: 0,
        }
    }
}

/// Configuration passed once to [`crate::Engine::new`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Capacity of every resource without an override
    pub max_resource_capacity: u32,
    /// Per-resource capacity overrides
    pub resource_capacities: FxHashMap<ResourceId, u32>,
    /// Inclusive start of the planning horizon
    pub w_start: Time,
    /// Exclusive end of the planning horizon
    pub w_end: Time,
    /// Weighted criteria summed into the schedule cost
    pub criteria: Vec<WeightedCriterion>,
    /// Cooldown applied to deferred tasks and to perturbed tasks
    pub tabu_wait_turns: u32,
    pub budget: SearchBudget,
    /// Maximum number of branches evaluated per iteration
    pub branching_factor: usize,
    /// Evaluate branches of one iteration on the rayon pool
    pub parallel_branches: bool,
    pub frontier_mode: FrontierMode,
    pub reference_policy: ReferencePolicy,
    pub placement_policy: PlacementPolicy,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resource_capacity: 1,
            resource_capacities: FxHashMap::default(),
            w_start: 0,
            w_end: 10_000,
            criteria: vec![
                WeightedCriterion::new(Criterion::Makespan, 1.0),
                WeightedCriterion::new(Criterion::PriorityWeightedTardiness, 1.0),
            ],
            tabu_wait_turns: 3,
            budget: SearchBudget::default(),
            branching_factor: 8,
            parallel_branches: true,
            frontier_mode: FrontierMode::default(),
            reference_policy: ReferencePolicy::default(),
            placement_policy: PlacementPolicy::default(),
            verbosity: 0,
        }
    }
}

impl EngineConfig {
    /// Set the planning window `[w_start, w_end)`.
    pub fn with_window(mut self, w_start: Time, w_end: Time) -> Self {
        self.w_start = w_start;
        self.w_end = w_end;
        self
    }

    /// Set the default resource capacity.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.max_resource_capacity = capacity;
        self
    }

    /// Override the capacity of one resource.
    pub fn with_resource_capacity(mut self, resource: ResourceId, capacity: u32) -> Self {
        self.resource_capacities.insert(resource, capacity);
        self
    }

    /// Replace the weighted criteria.
    pub fn with_criteria(mut self, criteria: Vec<WeightedCriterion>) -> Self {
        self.criteria = criteria;
        self
    }

    /// Set the cooldown length.
    pub fn with_tabu_wait_turns(mut self, turns: u32) -> Self {
        self.tabu_wait_turns = turns;
        self
    }

    /// Set the search budget.
    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the branches evaluated per iteration.
    pub fn with_branching_factor(mut self, branching_factor: usize) -> Self {
        self.branching_factor = branching_factor;
        self
    }

    /// Evaluate branches on the rayon pool.
    pub fn with_parallel_branches(mut self, parallel: bool) -> Self {
        self.parallel_branches = parallel;
        self
    }

    /// Choose how frontiers are labelled.
    pub fn with_frontier_mode(mut self, mode: FrontierMode) -> Self {
        self.frontier_mode = mode;
        self
    }

    /// Choose how dangling successor references are handled.
    pub fn with_reference_policy(mut self, policy: ReferencePolicy) -> Self {
        self.reference_policy = policy;
        self
    }

    /// Choose backfilling or appending placement.
    pub fn with_placement_policy(mut self, policy: PlacementPolicy) -> Self {
        self.placement_policy = policy;
        self
    }

    /// Set the logging verbosity.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Capacities with per-resource overrides applied.
    pub fn capacities(&self) -> Capacities {
        Capacities {
            default: self.max_resource_capacity,
            overrides: self.resource_capacities.clone(),
        }
    }

    /// Check window, capacities, criteria weights and search parameters.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.w_start < 0 || self.w_start >= self.w_end {
            return Err(SchedulerError::InvalidBounds(format!(
                "window [{}, {}) requires 0 <= WStart < WEnd",
                self.w_start, self.w_end
            )));
        }
        if self.max_resource_capacity == 0 {
            return Err(SchedulerError::InvalidBounds(
                "max resource capacity must be at least 1".to_string(),
            ));
        }
        if let Some((resource, _)) = self.resource_capacities.iter().find(|(_, &c)| c == 0) {
            return Err(SchedulerError::InvalidBounds(format!(
                "capacity of resource {} must be at least 1",
                resource
            )));
        }
        if let Some(bad) = self
            .criteria
            .iter()
            .find(|c| !c.weight.is_finite() || c.weight < 0.0)
        {
            return Err(SchedulerError::InvalidBounds(format!(
                "criterion {} has invalid weight {}",
                bad.criterion.name(),
                bad.weight
            )));
        }
        if self.tabu_wait_turns == 0 {
            return Err(SchedulerError::InvalidBounds(
                "tabu wait turns must be at least 1".to_string(),
            ));
        }
        if self.branching_factor == 0 {
            return Err(SchedulerError::InvalidBounds(
                "branching factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
