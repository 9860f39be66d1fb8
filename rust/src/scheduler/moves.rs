//! Perturbations of a build attempt and their generation.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

use crate::models::{Schedule, TaskKey, Time};
use crate::problem::Problem;

use super::builder::{Blocker, BuildReport};

/// A change to the inputs of the next build attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Perturbation {
    /// Move `task` (and every ancestor of it positioned after `ahead_of`)
    /// to just before `ahead_of` in the visiting order.
    Promote { task: TaskKey, ahead_of: TaskKey },
    /// Raise the effective release of `task` to at least `not_before`.
    Delay { task: TaskKey, not_before: Time },
}

impl Perturbation {
    /// The task that becomes tabu once this perturbation is applied.
    pub fn subject(&self) -> TaskKey {
        match self {
            Perturbation::Promote { task, .. } | Perturbation::Delay { task, .. } => *task,
        }
    }

    /// Apply to an order and override set. Returns false if nothing changed.
    pub fn apply(
        &self,
        problem: &Problem,
        order: &mut Vec<TaskKey>,
        release_overrides: &mut FxHashMap<TaskKey, Time>,
    ) -> bool {
        match *self {
            Perturbation::Promote { task, ahead_of } => {
                let Some(target) = order.iter().position(|&k| k == ahead_of) else {
                    return false;
                };
                let group: FxHashSet<TaskKey> = problem.ancestors(task).into_iter().collect();
                if group.contains(&ahead_of) {
                    return false;
                }
                let moved: Vec<TaskKey> = order[target..]
                    .iter()
                    .copied()
                    .filter(|k| group.contains(k))
                    .collect();
                if !moved.contains(&task) {
                    return false;
                }
                order.retain(|k| !(group.contains(k) && moved.contains(k)));
                let tail = order.split_off(target.min(order.len()));
                order.extend(moved);
                order.extend(tail);
                true
            }
            Perturbation::Delay { task, not_before } => {
                let current = release_overrides
                    .get(&task)
                    .copied()
                    .or_else(|| problem.task(task).map(|t| t.release_time))
                    .unwrap_or(0);
                if not_before <= current {
                    return false;
                }
                release_overrides.insert(task, not_before);
                true
            }
        }
    }
}

impl fmt::Display for Perturbation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Perturbation::Promote { task, ahead_of } => {
                write!(f, "promote {} ahead of {}", task, ahead_of)
            }
            Perturbation::Delay { task, not_before } => {
                write!(f, "delay {} to {}", task, not_before)
            }
        }
    }
}

/// Tasks the next moves should try to help.
///
/// For an incomplete attempt these are the root-cause tasks blocked by the
/// window (capacity blockers are permanent and skipped). For a complete one
/// they are the tasks finishing at the makespan.
fn focus_tasks(schedule: &Schedule, report: &BuildReport) -> Vec<TaskKey> {
    if !report.complete {
        return report
            .root_causes()
            .filter(|(_, b)| matches!(b, Blocker::Window { .. }))
            .map(|(k, _)| k)
            .collect();
    }
    let Some(end) = schedule.completion_time() else {
        return Vec::new();
    };
    let mut critical: Vec<TaskKey> = schedule
        .assignments()
        .filter(|a| a.end_time() == end)
        .map(|a| a.task)
        .collect();
    critical.sort_unstable();
    critical
}

/// Candidate perturbations for one search node, nearest conflicts first.
///
/// Each focus task is expanded to its ancestor chain, ordered by slack and
/// then frontier. For every chain member, the committed tasks on the same
/// resource that precede it in the visiting order are its competitors; each
/// competitor yields a `Promote` of the member ahead of it and a `Delay` of
/// the competitor by the member's processing time. Inadmissible subjects are
/// filtered out.
pub fn generate(
    problem: &Problem,
    order: &[TaskKey],
    schedule: &Schedule,
    report: &BuildReport,
    is_admissible: impl Fn(TaskKey) -> bool,
    limit: usize,
) -> Vec<Perturbation> {
    let position: FxHashMap<TaskKey, usize> =
        order.iter().enumerate().map(|(i, &k)| (k, i)).collect();
    let bounds = problem.bounds();
    let mut seen = FxHashSet::default();
    let mut moves = Vec::new();

    for focus in focus_tasks(schedule, report) {
        let ancestors = problem.ancestors(focus);
        let group: FxHashSet<TaskKey> = ancestors.iter().copied().collect();
        let mut chain = ancestors;
        chain.sort_by_key(|&k| {
            let slack = bounds.slack(k).unwrap_or(Time::MAX);
            (slack, problem.frontier(k).unwrap_or(0), k)
        });

        for member in chain {
            let Some(task) = problem.task(member) else {
                continue;
            };
            let Some(&member_pos) = position.get(&member) else {
                continue;
            };

            let mut competitors: Vec<(Time, Time, TaskKey)> = problem
                .tasks_on(task.resource_id)
                .iter()
                .filter(|&&c| c != member && !group.contains(&c))
                .filter(|&&c| position.get(&c).is_some_and(|&p| p < member_pos))
                .filter_map(|&c| {
                    schedule
                        .assignment(c)
                        .map(|a| (a.starting_time, a.processing_time, c))
                })
                .collect();
            competitors.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)));

            for (start, processing, competitor) in competitors {
                let candidates = [
                    (
                        member,
                        Perturbation::Promote {
                            task: member,
                            ahead_of: competitor,
                        },
                    ),
                    (
                        competitor,
                        Perturbation::Delay {
                            task: competitor,
                            not_before: start.saturating_add(task.processing_time),
                        },
                    ),
                ];
                for (subject, perturbation) in candidates {
                    if let Perturbation::Delay { not_before, .. } = perturbation {
                        if not_before.saturating_add(processing) > problem.w_end() {
                            continue;
                        }
                    }
                    if !is_admissible(subject) || !seen.insert(perturbation) {
                        continue;
                    }
                    moves.push(perturbation);
                    if moves.len() >= limit {
                        return moves;
                    }
                }
            }
        }
    }

    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{Plan, Task};
    use crate::scheduler::builder::ScheduleBuilder;
    use crate::scheduler::state::BuildState;

    /// Plan 2 hogs resource 0 first; plan 1 needs resource 0 then a long
    /// step on resource 1 that no longer fits the window.
    fn make_problem() -> (Problem, EngineConfig) {
        let config = EngineConfig::default().with_window(0, 6);
        let blocker = Plan::new(2, 0)
            .with_tasks([Task::new(1, 2, 0, 0, 2)])
            .unwrap();
        let victim = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 0, 2).with_successors([2]),
                Task::new(2, 1, 1, 0, 4),
            ])
            .unwrap();
        let problem = Problem::new(vec![blocker, victim], &config).unwrap();
        (problem, config)
    }

    #[test]
    fn test_promote_moves_ancestors_together() {
        let (problem, _) = make_problem();
        let mut order = problem.visiting_order().to_vec();
        assert_eq!(order[0], TaskKey::new(2, 1));

        let promote = Perturbation::Promote {
            task: TaskKey::new(1, 2),
            ahead_of: TaskKey::new(2, 1),
        };
        assert!(promote.apply(&problem, &mut order, &mut FxHashMap::default()));
        assert_eq!(
            order,
            vec![TaskKey::new(1, 1), TaskKey::new(1, 2), TaskKey::new(2, 1)]
        );
        // Already ahead.
        assert!(!promote.apply(&problem, &mut order, &mut FxHashMap::default()));
    }

    #[test]
    fn test_promote_ahead_of_ancestor_is_rejected() {
        let (problem, _) = make_problem();
        let mut order = problem.visiting_order().to_vec();
        let promote = Perturbation::Promote {
            task: TaskKey::new(1, 2),
            ahead_of: TaskKey::new(1, 1),
        };
        assert!(!promote.apply(&problem, &mut order, &mut FxHashMap::default()));
    }

    #[test]
    fn test_delay_only_raises() {
        let (problem, _) = make_problem();
        let mut order = problem.visiting_order().to_vec();
        let mut overrides = FxHashMap::default();
        let key = TaskKey::new(2, 1);
        let delay = Perturbation::Delay {
            task: key,
            not_before: 3,
        };
        assert!(delay.apply(&problem, &mut order, &mut overrides));
        assert_eq!(overrides.get(&key), Some(&3));
        assert!(!delay.apply(&problem, &mut order, &mut overrides));
        assert_eq!(delay.subject(), key);
    }

    #[test]
    fn test_generate_targets_blocking_competitor() {
        let (problem, config) = make_problem();
        let mut state = BuildState::new(&problem);
        let report = ScheduleBuilder::new(&problem, &config).build_schedule(&mut state);
        assert!(!report.complete);

        let moves = generate(
            &problem,
            &state.order,
            &state.schedule,
            &report,
            |_| true,
            8,
        );
        assert_eq!(
            moves,
            vec![
                Perturbation::Promote {
                    task: TaskKey::new(1, 1),
                    ahead_of: TaskKey::new(2, 1),
                },
                Perturbation::Delay {
                    task: TaskKey::new(2, 1),
                    not_before: 2,
                },
            ]
        );

        let limited = generate(
            &problem,
            &state.order,
            &state.schedule,
            &report,
            |key| key != TaskKey::new(1, 1),
            8,
        );
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].subject(), TaskKey::new(2, 1));
    }

    #[test]
    fn test_generate_on_complete_schedule_uses_makespan_tasks() {
        let config = EngineConfig::default();
        let plan = Plan::new(1, 0)
            .with_tasks([Task::new(1, 1, 0, 0, 2)])
            .unwrap();
        let problem = Problem::new(vec![plan], &config).unwrap();
        let mut state = BuildState::new(&problem);
        let report = ScheduleBuilder::new(&problem, &config).build_schedule(&mut state);
        assert!(report.complete);
        // Nothing competes with the only task.
        assert!(generate(&problem, &state.order, &state.schedule, &report, |_| true, 8).is_empty());
    }
}
