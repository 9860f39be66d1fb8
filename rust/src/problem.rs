//! Validated scheduling instance.
//!
//! `Problem::new` runs every structural check up front (window, duplicate
//! plans, task fields, dangling references, cycles) so that the search phase
//! only ever sees a well-formed instance.

use rustc_hash::FxHashMap;

use crate::bounds::{self, Bounds};
use crate::config::{Capacities, EngineConfig};
use crate::error::{GraphScope, SchedulerError};
use crate::graph::{build_adjacency, PrecedenceGraph};
use crate::log_checks;
use crate::models::{Plan, PlanId, ResourceId, Schedule, Task, TaskKey, Time};
use crate::ordering::{sort, TopologicalOrder};

/// A broken invariant found by [`Problem::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    UnknownTask(TaskKey),
    ResourceMismatch(TaskKey),
    OutsideWindow(TaskKey),
    BeforeRelease(TaskKey),
    Precedence { task: TaskKey, predecessor: TaskKey },
    PlanPrecedence { task: TaskKey, predecessor: PlanId },
    Capacity {
        resource: ResourceId,
        time: Time,
        load: u32,
        capacity: u32,
    },
}

#[derive(Clone, Debug)]
pub struct Problem {
    plans: Vec<Plan>,
    plan_index: FxHashMap<PlanId, usize>,
    plan_graph: PrecedenceGraph,
    plan_order: TopologicalOrder,
    task_orders: FxHashMap<PlanId, TopologicalOrder>,
    predecessors: FxHashMap<TaskKey, Vec<TaskKey>>,
    successors: FxHashMap<TaskKey, Vec<TaskKey>>,
    visiting_order: Vec<TaskKey>,
    by_resource: FxHashMap<ResourceId, Vec<TaskKey>>,
    capacities: Capacities,
    w_start: Time,
    w_end: Time,
    empty: Schedule,
    bounds: Bounds,
}

impl Problem {
    /// Validate `plans` and build both precedence levels, the visiting
    /// order and the bounds.
    pub fn new(plans: Vec<Plan>, config: &EngineConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let verbosity = config.verbosity;

        let mut plan_index = FxHashMap::default();
        for (idx, plan) in plans.iter().enumerate() {
            if plan_index.insert(plan.id, idx).is_some() {
                return Err(SchedulerError::DuplicatePlan(plan.id));
            }
            for task in plan.tasks() {
                if task.plan_id != plan.id {
                    return Err(SchedulerError::InvalidTask {
                        plan: plan.id,
                        task: task.id,
                        reason: format!("task belongs to plan {}", task.plan_id),
                    });
                }
                task.validate()?;
            }
        }

        let plan_graph = build_adjacency(&plans, config.reference_policy)
            .map_err(|e| SchedulerError::graph(GraphScope::Plans, e))?;
        for (from, to) in plan_graph.skipped() {
            log_checks!(
                verbosity,
                "Skipping unknown successor plan {} of plan {}",
                to,
                from
            );
        }
        let plan_order = sort(&plan_graph, config.frontier_mode)
            .map_err(|e| SchedulerError::graph(GraphScope::Plans, e))?;

        let mut task_orders = FxHashMap::default();
        let mut predecessors: FxHashMap<TaskKey, Vec<TaskKey>> = FxHashMap::default();
        let mut successors: FxHashMap<TaskKey, Vec<TaskKey>> = FxHashMap::default();
        let mut by_resource: FxHashMap<ResourceId, Vec<TaskKey>> = FxHashMap::default();

        for plan in &plans {
            let scope = GraphScope::Tasks(plan.id);
            let graph = build_adjacency(plan.tasks(), config.reference_policy)
                .map_err(|e| SchedulerError::graph(scope, e))?;
            for (from, to) in graph.skipped() {
                log_checks!(
                    verbosity,
                    "Skipping unknown successor task {} of task {} in plan {}",
                    to,
                    from,
                    plan.id
                );
            }
            let order =
                sort(&graph, config.frontier_mode).map_err(|e| SchedulerError::graph(scope, e))?;

            for task in plan.tasks() {
                let key = task.key();
                predecessors.insert(
                    key,
                    graph
                        .predecessors(task.id)
                        .iter()
                        .map(|&p| TaskKey::new(plan.id, p))
                        .collect(),
                );
                successors.insert(
                    key,
                    graph
                        .successors(task.id)
                        .iter()
                        .map(|e| TaskKey::new(plan.id, e.to))
                        .collect(),
                );
                by_resource.entry(task.resource_id).or_default().push(key);
            }
            task_orders.insert(plan.id, order);
        }

        let mut visiting_order = Vec::with_capacity(predecessors.len());
        for plan_node in plan_order.roots_first() {
            if let Some(order) = task_orders.get(&plan_node.id) {
                visiting_order.extend(
                    order
                        .roots_first()
                        .map(|n| TaskKey::new(plan_node.id, n.id)),
                );
            }
        }

        let mut problem = Self {
            plans,
            plan_index,
            plan_graph,
            plan_order,
            task_orders,
            predecessors,
            successors,
            visiting_order,
            by_resource,
            capacities: config.capacities(),
            w_start: config.w_start,
            w_end: config.w_end,
            empty: Schedule::new(config.w_start, config.w_end)?,
            bounds: Bounds::default(),
        };
        problem.bounds = bounds::compute(&problem);
        Ok(problem)
    }

    /// Plans in input order.
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Look up a plan by id.
    pub fn plan(&self, id: PlanId) -> Option<&Plan> {
        self.plan_index.get(&id).map(|&idx| &self.plans[idx])
    }

    /// Look up a task by key.
    pub fn task(&self, key: TaskKey) -> Option<&Task> {
        self.plan(key.plan)?.task(key.task)
    }

    /// Number of tasks over all plans.
    pub fn task_count(&self) -> usize {
        self.visiting_order.len()
    }

    /// Roots-first visiting order: plans in plan-precedence order, each
    /// plan's tasks in task-precedence order.
    pub fn visiting_order(&self) -> &[TaskKey] {
        &self.visiting_order
    }

    /// Task-level predecessors of `key`.
    pub fn predecessors(&self, key: TaskKey) -> &[TaskKey] {
        self.predecessors.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Task-level successors of `key`.
    pub fn successors(&self, key: TaskKey) -> &[TaskKey] {
        self.successors.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Plans that must complete before `plan` starts.
    pub fn plan_predecessors(&self, plan: PlanId) -> &[PlanId] {
        self.plan_graph.predecessors(plan)
    }

    /// Plans waiting on `plan`.
    pub fn plan_successors(&self, plan: PlanId) -> impl Iterator<Item = PlanId> + '_ {
        self.plan_graph.successors(plan).iter().map(|e| e.to)
    }

    /// Topological order of the plan graph.
    pub fn plan_order(&self) -> &TopologicalOrder {
        &self.plan_order
    }

    /// Topological order of one plan's task graph.
    pub fn task_order(&self, plan: PlanId) -> Option<&TopologicalOrder> {
        self.task_orders.get(&plan)
    }

    /// Frontier label of a task within its plan's order.
    pub fn frontier(&self, key: TaskKey) -> Option<u32> {
        self.task_orders.get(&key.plan)?.frontier(key.task)
    }

    /// Tasks using `resource`, in plan then insertion order.
    pub fn tasks_on(&self, resource: ResourceId) -> &[TaskKey] {
        self.by_resource.get(&resource).map_or(&[], Vec::as_slice)
    }

    /// `key` plus every task it transitively waits for, including all tasks
    /// of predecessor plans.
    pub fn ancestors(&self, key: TaskKey) -> Vec<TaskKey> {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut stack = vec![key];
        let mut out = Vec::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.predecessors(current).iter().copied());
            for &plan_id in self.plan_predecessors(current.plan) {
                if let Some(plan) = self.plan(plan_id) {
                    stack.extend(plan.tasks().iter().map(Task::key));
                }
            }
        }
        out
    }

    /// Per-resource capacities.
    pub fn capacities(&self) -> &Capacities {
        &self.capacities
    }

    /// Capacity of one resource.
    pub fn capacity_of(&self, resource: ResourceId) -> u32 {
        self.capacities.of(resource)
    }

    /// Inclusive window start.
    pub fn w_start(&self) -> Time {
        self.w_start
    }

    /// Exclusive window end.
    pub fn w_end(&self) -> Time {
        self.w_end
    }

    /// Capacity-free time bounds.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// A schedule with no assignments over this problem's window.
    pub fn empty_schedule(&self) -> Schedule {
        self.empty.clone()
    }

    /// True if every task of every plan has an assignment.
    pub fn is_complete(&self, schedule: &Schedule) -> bool {
        schedule.len() == self.task_count()
            && self
                .visiting_order
                .iter()
                .all(|&key| schedule.is_committed(key))
    }

    /// Re-check window, release, precedence and capacity invariants of
    /// `schedule` without consulting any timeline.
    pub fn verify(&self, schedule: &Schedule) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut points: FxHashMap<ResourceId, Vec<(Time, i64)>> = FxHashMap::default();

        for a in schedule.assignments() {
            let Some(task) = self.task(a.task) else {
                violations.push(Violation::UnknownTask(a.task));
                continue;
            };
            if task.resource_id != a.resource {
                violations.push(Violation::ResourceMismatch(a.task));
            }
            if a.starting_time < self.w_start || a.end_time() > self.w_end {
                violations.push(Violation::OutsideWindow(a.task));
            }
            if a.starting_time < task.release_time {
                violations.push(Violation::BeforeRelease(a.task));
            }
            for &pred in self.predecessors(a.task) {
                let satisfied = schedule
                    .assignment(pred)
                    .is_some_and(|p| p.end_time() <= a.starting_time);
                if !satisfied {
                    violations.push(Violation::Precedence {
                        task: a.task,
                        predecessor: pred,
                    });
                }
            }
            for &plan_id in self.plan_predecessors(a.task.plan) {
                let satisfied = self.plan(plan_id).is_some_and(|plan| {
                    plan.tasks().iter().all(|t| {
                        schedule
                            .assignment(t.key())
                            .is_some_and(|p| p.end_time() <= a.starting_time)
                    })
                });
                if !satisfied {
                    violations.push(Violation::PlanPrecedence {
                        task: a.task,
                        predecessor: plan_id,
                    });
                }
            }
            let entry = points.entry(a.resource).or_default();
            entry.push((a.starting_time, a.demand as i64));
            entry.push((a.end_time(), -(a.demand as i64)));
        }

        let mut resources: Vec<ResourceId> = points.keys().copied().collect();
        resources.sort_unstable();
        for resource in resources {
            let Some(deltas) = points.get_mut(&resource) else {
                continue;
            };
            // Releases before acquisitions at the same instant.
            deltas.sort_unstable();
            let capacity = self.capacity_of(resource);
            let mut load: i64 = 0;
            for &(time, delta) in deltas.iter() {
                load += delta;
                if load > capacity as i64 {
                    violations.push(Violation::Capacity {
                        resource,
                        time,
                        load: load as u32,
                        capacity,
                    });
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferencePolicy;
    use crate::models::ScheduleAssignment;

    fn chain_plan(id: PlanId, resource: ResourceId, len: u32) -> Plan {
        let tasks = (1..=len).map(|t| {
            let task = Task::new(t, id, resource, 0, 2);
            if t < len {
                task.with_successors([t + 1])
            } else {
                task
            }
        });
        Plan::new(id, 10).with_tasks(tasks).unwrap()
    }

    #[test]
    fn test_visiting_order_respects_precedence() {
        let a = chain_plan(1, 0, 3).with_successors([2]);
        let b = chain_plan(2, 0, 2);
        let problem = Problem::new(vec![b, a], &EngineConfig::default()).unwrap();
        let order: Vec<TaskKey> = problem.visiting_order().to_vec();
        assert_eq!(
            order,
            vec![
                TaskKey::new(1, 1),
                TaskKey::new(1, 2),
                TaskKey::new(1, 3),
                TaskKey::new(2, 1),
                TaskKey::new(2, 2),
            ]
        );
        assert_eq!(problem.plan_predecessors(2), &[1]);
        assert_eq!(problem.predecessors(TaskKey::new(1, 2)), &[TaskKey::new(1, 1)]);
        assert_eq!(problem.frontier(TaskKey::new(1, 3)), Some(2));
    }

    #[test]
    fn test_duplicate_plan_rejected() {
        let err = Problem::new(
            vec![chain_plan(1, 0, 1), chain_plan(1, 0, 2)],
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::DuplicatePlan(1));
    }

    #[test]
    fn test_task_cycle_rejected() {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 0, 1).with_successors([2]),
                Task::new(2, 1, 0, 0, 1).with_successors([3]),
                Task::new(3, 1, 0, 0, 1).with_successors([1]),
            ])
            .unwrap();
        let err = Problem::new(vec![plan], &EngineConfig::default()).unwrap_err();
        assert!(err.is_cycle());
    }

    #[test]
    fn test_plan_cycle_rejected() {
        let a = chain_plan(1, 0, 1).with_successors([2]);
        let b = chain_plan(2, 0, 1).with_successors([1]);
        let err = Problem::new(vec![a, b], &EngineConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Graph {
                scope: GraphScope::Plans,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_reference_policy() {
        let plan = Plan::new(1, 0)
            .with_tasks([Task::new(1, 1, 0, 0, 1).with_successors([99])])
            .unwrap();
        let lenient = Problem::new(vec![plan.clone()], &EngineConfig::default()).unwrap();
        assert!(lenient.successors(TaskKey::new(1, 1)).is_empty());

        let strict = EngineConfig::default().with_reference_policy(ReferencePolicy::Strict);
        let err = Problem::new(vec![plan], &strict).unwrap_err();
        assert!(err.is_unknown_reference());
    }

    #[test]
    fn test_invalid_window_rejected_eagerly() {
        let config = EngineConfig::default().with_window(5, 2);
        let err = Problem::new(vec![chain_plan(1, 0, 1)], &config).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidBounds(_)));
    }

    #[test]
    fn test_ancestors_include_predecessor_plans() {
        let a = chain_plan(1, 0, 2).with_successors([2]);
        let b = chain_plan(2, 0, 2);
        let problem = Problem::new(vec![a, b], &EngineConfig::default()).unwrap();
        let mut ancestors = problem.ancestors(TaskKey::new(2, 2));
        ancestors.sort();
        assert_eq!(
            ancestors,
            vec![
                TaskKey::new(1, 1),
                TaskKey::new(1, 2),
                TaskKey::new(2, 1),
                TaskKey::new(2, 2),
            ]
        );
    }

    #[test]
    fn test_verify_detects_overlap_and_precedence() {
        let problem = Problem::new(vec![chain_plan(1, 0, 2)], &EngineConfig::default()).unwrap();
        let mut schedule = problem.empty_schedule();
        let t1 = problem.task(TaskKey::new(1, 1)).unwrap();
        let t2 = problem.task(TaskKey::new(1, 2)).unwrap();
        schedule.commit(ScheduleAssignment::new(t1, 0)).unwrap();
        schedule.commit(ScheduleAssignment::new(t2, 1)).unwrap();

        let violations = problem.verify(&schedule);
        assert!(violations.contains(&Violation::Precedence {
            task: TaskKey::new(1, 2),
            predecessor: TaskKey::new(1, 1),
        }));
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::Capacity { resource: 0, time: 1, .. })));
    }

    #[test]
    fn test_verify_accepts_back_to_back() {
        let problem = Problem::new(vec![chain_plan(1, 0, 2)], &EngineConfig::default()).unwrap();
        let mut schedule = problem.empty_schedule();
        schedule
            .commit(ScheduleAssignment::new(problem.task(TaskKey::new(1, 1)).unwrap(), 0))
            .unwrap();
        schedule
            .commit(ScheduleAssignment::new(problem.task(TaskKey::new(1, 2)).unwrap(), 2))
            .unwrap();
        assert!(problem.verify(&schedule).is_empty());
        assert!(problem.is_complete(&schedule));
    }
}
