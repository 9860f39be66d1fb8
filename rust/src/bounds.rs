//! Capacity-free time bounds for every task.
//!
//! A forward pass over the roots-first visiting order gives each task its
//! earliest start (window start, release, task predecessors, completion of
//! predecessor plans). A backward pass over the reversed order gives its
//! latest start against the window end and all successors. Resources are
//! ignored, so the bounds are optimistic: a task whose latest start falls
//! before its earliest start can never be scheduled.

use rustc_hash::FxHashMap;

use crate::models::{PlanId, TaskKey, Time};
use crate::problem::Problem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskBounds {
    pub earliest_start: Time,
    pub earliest_finish: Time,
    pub latest_start: Time,
    pub latest_finish: Time,
}

impl TaskBounds {
    /// Latest minus earliest start; negative when the task cannot fit.
    pub fn slack(&self) -> Time {
        self.latest_start.saturating_sub(self.earliest_start)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bounds {
    tasks: FxHashMap<TaskKey, TaskBounds>,
    plan_completion: FxHashMap<PlanId, Time>,
}

impl Bounds {
    /// Bounds of one task.
    pub fn task(&self, key: TaskKey) -> Option<&TaskBounds> {
        self.tasks.get(&key)
    }

    /// Slack of one task.
    pub fn slack(&self, key: TaskKey) -> Option<Time> {
        self.tasks.get(&key).map(TaskBounds::slack)
    }

    /// Earliest time at which every task of `plan` can be finished.
    pub fn plan_earliest_completion(&self, plan: PlanId) -> Option<Time> {
        self.plan_completion.get(&plan).copied()
    }

    /// Tasks that cannot fit in the window even on idle resources, sorted.
    pub fn trivially_infeasible(&self) -> Vec<TaskKey> {
        let mut out: Vec<TaskKey> = self
            .tasks
            .iter()
            .filter(|(_, b)| b.slack() < 0)
            .map(|(&k, _)| k)
            .collect();
        out.sort_unstable();
        out
    }
}

/// Run the forward and backward passes over `problem`.
pub fn compute(problem: &Problem) -> Bounds {
    let order = problem.visiting_order();
    let mut earliest: FxHashMap<TaskKey, (Time, Time, Time)> = FxHashMap::default();
    let mut plan_completion: FxHashMap<PlanId, Time> = FxHashMap::default();

    for &key in order {
        let Some(task) = problem.task(key) else {
            continue;
        };
        let mut es = problem.w_start().max(task.release_time);
        for pred in problem.predecessors(key) {
            if let Some(&(_, ef, _)) = earliest.get(pred) {
                es = es.max(ef);
            }
        }
        for plan in problem.plan_predecessors(key.plan) {
            if let Some(&done) = plan_completion.get(plan) {
                es = es.max(done);
            }
        }
        let ef = es.saturating_add(task.processing_time);
        earliest.insert(key, (es, ef, task.processing_time));
        let done = plan_completion.entry(key.plan).or_insert(ef);
        *done = (*done).max(ef);
    }

    let mut latest: FxHashMap<TaskKey, Time> = FxHashMap::default();
    let mut plan_latest_start: FxHashMap<PlanId, Time> = FxHashMap::default();

    for &key in order.iter().rev() {
        let Some(task) = problem.task(key) else {
            continue;
        };
        let mut lf = problem.w_end();
        for succ in problem.successors(key) {
            if let Some(&ls) = latest.get(succ) {
                lf = lf.min(ls);
            }
        }
        for plan in problem.plan_successors(key.plan) {
            if let Some(&ls) = plan_latest_start.get(&plan) {
                lf = lf.min(ls);
            }
        }
        let ls = lf.saturating_sub(task.processing_time);
        latest.insert(key, ls);
        let start = plan_latest_start.entry(key.plan).or_insert(ls);
        *start = (*start).min(ls);
    }

    let tasks = earliest
        .into_iter()
        .map(|(key, (es, ef, processing))| {
            let ls = latest.get(&key).copied().unwrap_or(es);
            (
                key,
                TaskBounds {
                    earliest_start: es,
                    earliest_finish: ef,
                    latest_start: ls,
                    latest_finish: ls.saturating_add(processing),
                },
            )
        })
        .collect();

    Bounds {
        tasks,
        plan_completion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{Plan, Task};

    #[test]
    fn test_chain_bounds() {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 2, 3).with_successors([2]),
                Task::new(2, 1, 1, 0, 4),
            ])
            .unwrap();
        let config = EngineConfig::default().with_window(0, 20);
        let problem = Problem::new(vec![plan], &config).unwrap();
        let bounds = problem.bounds();

        let first = bounds.task(TaskKey::new(1, 1)).unwrap();
        assert_eq!(first.earliest_start, 2);
        assert_eq!(first.earliest_finish, 5);
        assert_eq!(first.latest_start, 13);

        let second = bounds.task(TaskKey::new(1, 2)).unwrap();
        assert_eq!(second.earliest_start, 5);
        assert_eq!(second.latest_start, 16);
        assert_eq!(second.latest_finish, 20);
        assert_eq!(bounds.plan_earliest_completion(1), Some(9));
        assert!(bounds.trivially_infeasible().is_empty());
    }

    #[test]
    fn test_plan_precedence_propagates_both_ways() {
        let a = Plan::new(1, 0)
            .with_successors([2])
            .with_tasks([Task::new(1, 1, 0, 0, 3)])
            .unwrap();
        let b = Plan::new(2, 0)
            .with_tasks([Task::new(1, 2, 1, 0, 2)])
            .unwrap();
        let config = EngineConfig::default().with_window(0, 10);
        let problem = Problem::new(vec![a, b], &config).unwrap();
        let bounds = problem.bounds();

        assert_eq!(bounds.task(TaskKey::new(2, 1)).unwrap().earliest_start, 3);
        assert_eq!(bounds.task(TaskKey::new(1, 1)).unwrap().latest_finish, 8);
        assert_eq!(bounds.slack(TaskKey::new(1, 1)), Some(5));
    }

    #[test]
    fn test_window_too_short() {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 0, 4).with_successors([2]),
                Task::new(2, 1, 0, 0, 4),
            ])
            .unwrap();
        let config = EngineConfig::default().with_window(0, 6);
        let problem = Problem::new(vec![plan], &config).unwrap();
        assert_eq!(
            problem.bounds().trivially_infeasible(),
            vec![TaskKey::new(1, 1), TaskKey::new(1, 2)]
        );
    }

    #[test]
    fn test_extreme_durations_saturate() {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 0, Time::MAX).with_successors([2]),
                Task::new(2, 1, 0, 0, Time::MAX),
            ])
            .unwrap();
        let config = EngineConfig::default().with_window(0, 10);
        let problem = Problem::new(vec![plan], &config).unwrap();
        let bounds = problem.bounds();

        let first = bounds.task(TaskKey::new(1, 1)).unwrap();
        assert_eq!(first.earliest_finish, Time::MAX);
        assert_eq!(first.latest_start, Time::MIN);
        assert_eq!(bounds.task(TaskKey::new(1, 2)).unwrap().earliest_start, Time::MAX);
        assert_eq!(
            bounds.trivially_infeasible(),
            vec![TaskKey::new(1, 1), TaskKey::new(1, 2)]
        );
    }
}
