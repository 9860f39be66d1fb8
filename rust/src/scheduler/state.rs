//! Build state snapshots.

use rustc_hash::FxHashMap;

use crate::models::{Schedule, TaskKey, Time};
use crate::problem::Problem;

use super::tabu::TabuList;
use super::timeline::ResourceTimeline;

/// Lifecycle of a task within one build attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Unscheduled,
    /// On the timeline, not yet in the schedule.
    Placed,
    Committed,
    /// Blocked; retried once its blocker clears or its cooldown decays.
    Deferred,
}

/// Everything one build attempt mutates.
///
/// Branches never share a state: each starts from `clone_for_branch` of the
/// seed and owns its schedule and timeline outright.
#[derive(Clone, Debug)]
pub struct BuildState {
    pub schedule: Schedule,
    pub timeline: ResourceTimeline,
    pub status: FxHashMap<TaskKey, TaskStatus>,
    /// Release times raised by `Delay` perturbations.
    pub release_overrides: FxHashMap<TaskKey, Time>,
    /// Roots-first visiting order, possibly permuted by `Promote`.
    pub order: Vec<TaskKey>,
    pub deferrals: TabuList,
}

impl BuildState {
    /// Create an empty state for the problem's visiting order.
    pub fn new(problem: &Problem) -> Self {
        let order = problem.visiting_order().to_vec();
        Self {
            schedule: problem.empty_schedule(),
            timeline: ResourceTimeline::new(problem.capacities().clone()),
            status: order
                .iter()
                .map(|&key| (key, TaskStatus::Unscheduled))
                .collect(),
            release_overrides: FxHashMap::default(),
            order,
            deferrals: TabuList::new(),
        }
    }

    /// Fresh state for an attempt with a given order and release overrides.
    pub fn with_order(
        problem: &Problem,
        order: Vec<TaskKey>,
        release_overrides: FxHashMap<TaskKey, Time>,
    ) -> Self {
        Self {
            order,
            release_overrides,
            ..Self::new(problem)
        }
    }

    /// Independent copy for a search branch.
    pub fn clone_for_branch(&self) -> Self {
        self.clone()
    }

    /// Status of `key`; unknown tasks read as unscheduled.
    pub fn status(&self, key: TaskKey) -> TaskStatus {
        self.status
            .get(&key)
            .copied()
            .unwrap_or(TaskStatus::Unscheduled)
    }

    /// Release time of `key` after applying any override.
    pub fn effective_release(&self, problem: &Problem, key: TaskKey) -> Option<Time> {
        let release = problem.task(key)?.release_time;
        Some(
            self.release_overrides
                .get(&key)
                .map_or(release, |&r| r.max(release)),
        )
    }

    /// Tasks not yet committed, in visiting order.
    pub fn unscheduled(&self) -> Vec<TaskKey> {
        self.order
            .iter()
            .copied()
            .filter(|&key| self.status(key) != TaskStatus::Committed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{Plan, ScheduleAssignment, Task};

    fn make_problem() -> Problem {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 2, 3).with_successors([2]),
                Task::new(2, 1, 0, 0, 1),
            ])
            .unwrap();
        Problem::new(vec![plan], &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_branch_clone_is_independent() {
        let problem = make_problem();
        let seed = BuildState::new(&problem);
        let mut branch = seed.clone_for_branch();

        let key = TaskKey::new(1, 1);
        let task = problem.task(key).unwrap();
        branch.timeline.place(key, 0, 2, 3, 1).unwrap();
        branch
            .schedule
            .commit(ScheduleAssignment::new(task, 2))
            .unwrap();
        branch.status.insert(key, TaskStatus::Committed);

        assert!(seed.schedule.is_empty());
        assert!(!seed.timeline.contains(key));
        assert_eq!(seed.status(key), TaskStatus::Unscheduled);
        assert_eq!(branch.unscheduled(), vec![TaskKey::new(1, 2)]);
    }

    #[test]
    fn test_release_override_only_raises() {
        let problem = make_problem();
        let mut overrides = FxHashMap::default();
        overrides.insert(TaskKey::new(1, 1), 1);
        overrides.insert(TaskKey::new(1, 2), 5);
        let state = BuildState::with_order(&problem, problem.visiting_order().to_vec(), overrides);
        assert_eq!(state.effective_release(&problem, TaskKey::new(1, 1)), Some(2));
        assert_eq!(state.effective_release(&problem, TaskKey::new(1, 2)), Some(5));
    }
}
