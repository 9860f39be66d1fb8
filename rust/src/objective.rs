//! Schedule scoring.
//!
//! The cost of a schedule is the weighted sum of its criteria. Criteria are a
//! closed set of named kinds plus a `Custom` escape hatch taking a plain
//! function pointer, so evaluation stays deterministic and `Send + Sync`.

use std::cmp::Ordering;
use std::fmt;

use crate::models::{PlanId, Schedule, Time};
use crate::problem::Problem;

#[derive(Clone, Copy)]
pub enum Criterion {
    /// Last completion minus window start.
    Makespan,
    /// Sum over plans of lateness past their due time.
    TotalTardiness,
    /// Tardiness of each plan multiplied by its priority (at least 1).
    PriorityWeightedTardiness,
    /// Sum of plan completion times.
    TotalCompletion,
    /// Sum over tasks of completion minus release.
    TotalFlowTime,
    Custom {
        name: &'static str,
        metric: fn(&Schedule) -> f64,
    },
}

impl Criterion {
    /// Stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Makespan => "makespan",
            Criterion::TotalTardiness => "total_tardiness",
            Criterion::PriorityWeightedTardiness => "priority_weighted_tardiness",
            Criterion::TotalCompletion => "total_completion",
            Criterion::TotalFlowTime => "total_flow_time",
            Criterion::Custom { name, .. } => *name,
        }
    }
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WeightedCriterion {
    pub criterion: Criterion,
    pub weight: f64,
}

impl WeightedCriterion {
    /// Pair a criterion with its weight in the summed cost.
    pub fn new(criterion: Criterion, weight: f64) -> Self {
        Self { criterion, weight }
    }
}

/// Score of one schedule. Lower is better; ties on `value` fall back to
/// makespan, then to total tardiness.
#[derive(Clone, Copy, Debug)]
pub struct Cost {
    pub value: f64,
    pub makespan: Time,
    pub tardiness: Time,
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.makespan.cmp(&other.makespan))
            .then(self.tardiness.cmp(&other.tardiness))
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cost {}

pub struct ObjectiveEvaluator<'a> {
    problem: &'a Problem,
    criteria: Vec<WeightedCriterion>,
}

impl<'a> ObjectiveEvaluator<'a> {
    /// Create an evaluator for `problem` with the given weighted criteria.
    pub fn new(problem: &'a Problem, criteria: &[WeightedCriterion]) -> Self {
        Self {
            problem,
            criteria: criteria.to_vec(),
        }
    }

    /// Weighted sum of every criterion, plus the makespan and total tardiness
    /// used to break ties.
    pub fn evaluate(&self, schedule: &Schedule) -> Cost {
        let value = self
            .criteria
            .iter()
            .map(|c| c.weight * self.metric(&c.criterion, schedule))
            .sum();
        Cost {
            value,
            makespan: schedule.makespan(),
            tardiness: self.total_tardiness(schedule),
        }
    }

    /// Unweighted value of one criterion.
    pub fn metric(&self, criterion: &Criterion, schedule: &Schedule) -> f64 {
        match criterion {
            Criterion::Makespan => schedule.makespan() as f64,
            Criterion::TotalTardiness => self.total_tardiness(schedule) as f64,
            Criterion::PriorityWeightedTardiness => self
                .problem
                .plans()
                .iter()
                .map(|plan| {
                    let weight = plan.priority.max(1) as f64;
                    weight * self.tardiness(plan.id, schedule) as f64
                })
                .sum(),
            Criterion::TotalCompletion => schedule
                .plan_ids()
                .filter_map(|plan| schedule.plan_completion(plan))
                .map(|done| done as f64)
                .sum(),
            Criterion::TotalFlowTime => schedule
                .assignments()
                .map(|a| {
                    let release = self
                        .problem
                        .task(a.task)
                        .map_or(schedule.w_start(), |t| t.release_time);
                    a.end_time().saturating_sub(release) as f64
                })
                .sum(),
            Criterion::Custom { metric, .. } => metric(schedule),
        }
    }

    /// Due time of a plan: explicit, else its earliest possible completion.
    pub fn due_time(&self, plan: PlanId) -> Option<Time> {
        self.problem
            .plan(plan)?
            .due_time
            .or_else(|| self.problem.bounds().plan_earliest_completion(plan))
    }

    fn tardiness(&self, plan: PlanId, schedule: &Schedule) -> Time {
        match (schedule.plan_completion(plan), self.due_time(plan)) {
            (Some(done), Some(due)) => done.saturating_sub(due).max(0),
            _ => 0,
        }
    }

    fn total_tardiness(&self, schedule: &Schedule) -> Time {
        self.problem
            .plans()
            .iter()
            .map(|plan| self.tardiness(plan.id, schedule))
            .fold(0, Time::saturating_add)
    }
}
