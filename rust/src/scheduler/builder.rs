//! Schedule construction for one attempt.
//!
//! The builder walks the state's visiting order and places each task at its
//! earliest feasible start. A task that cannot be placed is deferred under a
//! cooldown instead of aborting the attempt; later passes retry deferred
//! tasks whose blocker has cleared or whose cooldown has run out. The attempt
//! ends when every task is committed or a full pass makes no progress.

use rustc_hash::FxHashMap;
use std::fmt;

use crate::config::{EngineConfig, PlacementPolicy};
use crate::error::SchedulerError;
use crate::models::{PlanId, ScheduleAssignment, Task, TaskKey, Time};
use crate::problem::Problem;
use crate::{log_changes, log_checks, log_debug};

use super::state::{BuildState, TaskStatus};

/// Why a task could not be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Blocker {
    /// A task predecessor is not committed yet.
    Predecessor(TaskKey),
    /// A predecessor plan still has uncommitted tasks.
    PredecessorPlan(PlanId),
    /// No start at or after `earliest` finishes inside the window.
    Window { earliest: Time },
    /// The task's demand exceeds its resource's capacity.
    Capacity,
    /// The key names no task of the problem.
    UnknownTask,
}

impl Blocker {
    /// Window, capacity and unknown-task blockers are root causes; the
    /// others only wait on another task.
    pub fn is_root_cause(&self) -> bool {
        matches!(
            self,
            Blocker::Window { .. } | Blocker::Capacity | Blocker::UnknownTask
        )
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocker::Predecessor(key) => write!(f, "waiting for predecessor {}", key),
            Blocker::PredecessorPlan(plan) => write!(f, "waiting for predecessor plan {}", plan),
            Blocker::Window { earliest } => {
                write!(f, "no start at or after {} ends inside the window", earliest)
            }
            Blocker::Capacity => write!(f, "demand exceeds resource capacity"),
            Blocker::UnknownTask => write!(f, "task is not part of the problem"),
        }
    }
}

/// Outcome of [`ScheduleBuilder::build_schedule`].
#[derive(Clone, Debug, Default)]
pub struct BuildReport {
    pub complete: bool,
    pub passes: usize,
    /// Uncommitted tasks in visiting order with their last blocker.
    pub deferred: Vec<(TaskKey, Blocker)>,
    /// First root-cause placement failure of the attempt.
    pub infeasibility: Option<SchedulerError>,
}

impl BuildReport {
    /// Deferred tasks whose blocker is not another uncommitted task.
    pub fn root_causes(&self) -> impl Iterator<Item = (TaskKey, Blocker)> + '_ {
        self.deferred
            .iter()
            .copied()
            .filter(|(_, blocker)| blocker.is_root_cause())
    }
}

pub struct ScheduleBuilder<'a> {
    problem: &'a Problem,
    config: &'a EngineConfig,
}

impl<'a> ScheduleBuilder<'a> {
    /// Create a builder for one problem and configuration.
    pub fn new(problem: &'a Problem, config: &'a EngineConfig) -> Self {
        Self { problem, config }
    }

    /// Earliest start of `key` given what `state` has committed so far.
    ///
    /// The lower bound is the maximum of the window start, the effective
    /// release, predecessor completions and predecessor plan completions
    /// (plus the resource's last end under `PlacementPolicy::Append`). The
    /// result is the first event-aligned time at or after it where the
    /// timeline has room for the whole task.
    pub fn earliest_start(&self, key: TaskKey, state: &BuildState) -> Result<Time, Blocker> {
        let Some(task) = self.problem.task(key) else {
            return Err(Blocker::UnknownTask);
        };
        let mut lower = self
            .problem
            .w_start()
            .max(state.effective_release(self.problem, key).unwrap_or(0));

        for &pred in self.problem.predecessors(key) {
            match state.schedule.assignment(pred) {
                Some(a) => lower = lower.max(a.end_time()),
                None => return Err(Blocker::Predecessor(pred)),
            }
        }

        for &plan_id in self.problem.plan_predecessors(key.plan) {
            let Some(plan) = self.problem.plan(plan_id) else {
                continue;
            };
            if state.schedule.plan_len(plan_id) < plan.len() {
                return Err(Blocker::PredecessorPlan(plan_id));
            }
            if let Some(done) = state.schedule.plan_completion(plan_id) {
                lower = lower.max(done);
            }
        }

        if self.config.placement_policy == PlacementPolicy::Append {
            if let Some(last) = state.timeline.last_end(task.resource_id) {
                lower = lower.max(last);
            }
        }

        if task.demand > state.timeline.capacity(task.resource_id) {
            return Err(Blocker::Capacity);
        }

        state
            .timeline
            .earliest_fit(
                task.resource_id,
                lower,
                task.processing_time,
                task.demand,
                self.problem.w_end(),
            )
            .ok_or(Blocker::Window { earliest: lower })
    }

    /// True if `key` can be placed now: predecessors committed, a start
    /// inside the window, and room on its resource.
    pub fn check_constraints(&self, key: TaskKey, state: &BuildState) -> bool {
        self.earliest_start(key, state).is_ok()
    }

    /// Place `key` at its earliest feasible start and commit it.
    pub fn schedule_task(
        &self,
        key: TaskKey,
        state: &mut BuildState,
    ) -> Result<ScheduleAssignment, SchedulerError> {
        let start = self
            .earliest_start(key, state)
            .map_err(|blocker| infeasible(key, blocker))?;
        let task = self
            .problem
            .task(key)
            .ok_or_else(|| infeasible(key, Blocker::UnknownTask))?;
        self.commit_at(task, start, state)
    }

    fn commit_at(
        &self,
        task: &Task,
        start: Time,
        state: &mut BuildState,
    ) -> Result<ScheduleAssignment, SchedulerError> {
        let key = task.key();
        state
            .timeline
            .place(
                key,
                task.resource_id,
                start,
                task.processing_time,
                task.demand,
            )
            .map_err(|e| SchedulerError::InfeasibleSchedule {
                task: key,
                reason: e.to_string(),
            })?;
        state.status.insert(key, TaskStatus::Placed);

        let assignment = ScheduleAssignment::new(task, start);
        state.schedule.commit(assignment)?;
        state.status.insert(key, TaskStatus::Committed);
        state.deferrals.release(key);

        log_changes!(
            self.config.verbosity,
            "  Committed {} on resource {} at [{}, {})",
            key,
            task.resource_id,
            start,
            assignment.end_time()
        );
        Ok(assignment)
    }

    fn blocker_cleared(&self, blocker: Blocker, state: &BuildState) -> bool {
        match blocker {
            Blocker::Predecessor(pred) => state.schedule.is_committed(pred),
            Blocker::PredecessorPlan(plan) => self
                .problem
                .plan(plan)
                .is_some_and(|p| state.schedule.plan_len(plan) == p.len()),
            Blocker::Window { .. } | Blocker::Capacity | Blocker::UnknownTask => false,
        }
    }

    /// Run passes over the state's order until every task is committed or a
    /// pass commits nothing.
    pub fn build_schedule(&self, state: &mut BuildState) -> BuildReport {
        let verbosity = self.config.verbosity;
        let order = state.order.clone();
        let mut blockers: FxHashMap<TaskKey, Blocker> = FxHashMap::default();
        let mut report = BuildReport::default();

        loop {
            report.passes += 1;
            let mut progress = false;
            log_debug!(verbosity, "Build pass {}", report.passes);

            for &key in &order {
                match state.status(key) {
                    TaskStatus::Committed | TaskStatus::Placed => continue,
                    TaskStatus::Deferred => {
                        let cleared = blockers
                            .get(&key)
                            .is_some_and(|&b| self.blocker_cleared(b, state));
                        if state.deferrals.is_tabu(key) && !cleared {
                            log_debug!(
                                verbosity,
                                "  Skipping {} ({} turns left)",
                                key,
                                state.deferrals.wait_turns(key)
                            );
                            continue;
                        }
                    }
                    TaskStatus::Unscheduled => {}
                }

                let Some(task) = self.problem.task(key) else {
                    continue;
                };
                let placed = match self.earliest_start(key, state) {
                    Ok(start) => self.commit_at(task, start, state).map_err(|e| (e, None)),
                    Err(blocker) => Err((infeasible(key, blocker), Some(blocker))),
                };

                match placed {
                    Ok(_) => {
                        progress = true;
                        blockers.remove(&key);
                    }
                    Err((err, blocker)) => {
                        let blocker = blocker.unwrap_or(Blocker::Window {
                            earliest: self.problem.w_start(),
                        });
                        log_checks!(verbosity, "  Deferring {}: {}", key, blocker);
                        state.status.insert(key, TaskStatus::Deferred);
                        state.deferrals.mark(key, self.config.tabu_wait_turns);
                        blockers.insert(key, blocker);
                        if blocker.is_root_cause() && report.infeasibility.is_none() {
                            report.infeasibility = Some(err);
                        }
                    }
                }
            }

            if order
                .iter()
                .all(|&key| state.status(key) == TaskStatus::Committed)
            {
                report.complete = true;
                break;
            }
            if !progress {
                break;
            }
            state.deferrals.tick();
        }

        report.deferred = order
            .iter()
            .filter(|&&key| state.status(key) != TaskStatus::Committed)
            .map(|&key| {
                let blocker = blockers.get(&key).copied().unwrap_or(Blocker::Window {
                    earliest: self.problem.w_start(),
                });
                (key, blocker)
            })
            .collect();
        if report.complete {
            report.infeasibility = None;
        }
        report
    }
}

fn infeasible(task: TaskKey, blocker: Blocker) -> SchedulerError {
    SchedulerError::InfeasibleSchedule {
        task,
        reason: blocker.to_string(),
    }
}
