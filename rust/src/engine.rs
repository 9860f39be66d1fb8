//! Engine entry point.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::SchedulerError;
use crate::log_changes;
use crate::models::{Plan, Schedule, TaskKey};
use crate::objective::Cost;
use crate::problem::Problem;
use crate::scheduler::{CancelToken, Perturbation, SchedulerListener, TabuSearch, Termination};

/// Outcome of [`Engine::solve`].
#[derive(Clone, Debug)]
pub struct SolveResult {
    /// Best feasible schedule, or the best partial one when none was found.
    pub schedule: Schedule,
    pub feasible: bool,
    pub cost: Cost,
    /// Tasks missing from `schedule`, in visiting order.
    pub unscheduled: Vec<TaskKey>,
    /// Placement failure behind an infeasible result.
    pub infeasibility: Option<SchedulerError>,
    pub iterations: usize,
    pub moves_evaluated: usize,
    pub termination: Termination,
    /// Perturbations that led from the initial attempt to `schedule`.
    pub trail: Vec<Perturbation>,
}

/// Holds configuration and listeners; every `solve` call is independent.
pub struct Engine {
    config: EngineConfig,
    listeners: Vec<Arc<dyn SchedulerListener>>,
    cancel: CancelToken,
}

impl Engine {
    /// Create an engine, rejecting an invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            config,
            listeners: Vec::new(),
            cancel: CancelToken::new(),
        })
    }

    /// Configuration every `solve` call runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a listener for new best schedules.
    pub fn add_listener(&mut self, listener: Arc<dyn SchedulerListener>) {
        self.listeners.push(listener);
    }

    /// Handle for stopping a running `solve` from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Validate `plans` and build their precedence structure.
    pub fn prepare(&self, plans: Vec<Plan>) -> Result<Problem, SchedulerError> {
        Problem::new(plans, &self.config)
    }

    /// Schedule `plans`.
    ///
    /// Structural problems (duplicate ids, cycles, dangling references under
    /// the strict policy) are returned as errors before any search starts.
    /// Failing to place every task is not an error: the result carries
    /// `feasible = false` and the best partial schedule.
    pub fn solve(&self, plans: Vec<Plan>) -> Result<SolveResult, SchedulerError> {
        let problem = self.prepare(plans)?;
        Ok(self.solve_problem(&problem))
    }

    /// Schedule an already prepared problem. Never fails: infeasibility is
    /// reported in the result.
    pub fn solve_problem(&self, problem: &Problem) -> SolveResult {
        log_changes!(
            self.config.verbosity,
            "Scheduling {} tasks of {} plans in [{}, {})",
            problem.task_count(),
            problem.plans().len(),
            problem.w_start(),
            problem.w_end()
        );

        let outcome = TabuSearch::new(problem, &self.config, &self.listeners, &self.cancel).run();
        let best = outcome.best;
        let unscheduled: Vec<TaskKey> = best.report.deferred.iter().map(|(k, _)| *k).collect();

        let infeasibility = if best.feasible {
            None
        } else {
            best.report.infeasibility.clone().or_else(|| {
                best.report
                    .deferred
                    .first()
                    .map(|(task, blocker)| SchedulerError::InfeasibleSchedule {
                        task: *task,
                        reason: blocker.to_string(),
                    })
            })
        };

        SolveResult {
            schedule: best.schedule,
            feasible: best.feasible,
            cost: best.cost,
            unscheduled,
            infeasibility,
            iterations: outcome.iterations,
            moves_evaluated: outcome.moves_evaluated,
            termination: outcome.termination,
            trail: outcome.trail,
        }
    }
}
