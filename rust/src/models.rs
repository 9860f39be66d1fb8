//! Core data types for the scheduling system.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SchedulerError;

pub type TaskId = u32;
pub type PlanId = u32;
pub type ResourceId = u32;
/// Discrete time unit of the planning horizon.
pub type Time = i64;

/// Globally unique task identity: task ids are only unique within a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub plan: PlanId,
    pub task: TaskId,
}

impl TaskKey {
    /// Key of task `task` in plan `plan`.
    pub fn new(plan: PlanId, task: TaskId) -> Self {
        Self { plan, task }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}/t{}", self.plan, self.task)
    }
}

/// A task to be scheduled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub plan_id: PlanId,
    pub resource_id: ResourceId,
    pub release_time: Time,
    pub processing_time: Time,
    /// Units of resource capacity held while the task runs.
    pub demand: u32,
    /// Successor task ids within the same plan, duplicates removed.
    pub successors: Vec<TaskId>,
}

impl Task {
    /// Create a task with demand 1 and no successors.
    pub fn new(
        id: TaskId,
        plan_id: PlanId,
        resource_id: ResourceId,
        release_time: Time,
        processing_time: Time,
    ) -> Self {
        Self {
            id,
            plan_id,
            resource_id,
            release_time,
            processing_time,
            demand: 1,
            successors: Vec::new(),
        }
    }

    /// Set successor tasks, dropping duplicates but keeping first-seen order.
    pub fn with_successors(mut self, successors: impl IntoIterator<Item = TaskId>) -> Self {
        for succ in successors {
            if !self.successors.contains(&succ) {
                self.successors.push(succ);
            }
        }
        self
    }

    /// Set the capacity units this task holds while it runs.
    pub fn with_demand(mut self, demand: u32) -> Self {
        self.demand = demand;
        self
    }

    /// Problem-wide key of this task.
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.plan_id, self.id)
    }

    /// Check processing time, release time and demand.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |reason: &str| SchedulerError::InvalidTask {
            plan: self.plan_id,
            task: self.id,
            reason: reason.to_string(),
        };
        if self.processing_time <= 0 {
            return Err(invalid("processing time must be positive"));
        }
        if self.release_time < 0 {
            return Err(invalid("release time must not be negative"));
        }
        if self.demand == 0 {
            return Err(invalid("resource demand must be at least 1"));
        }
        Ok(())
    }
}

/// A project: a DAG of tasks plus a priority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub priority: i32,
    /// Successor plans; each may only start once this plan is complete.
    pub successors: Vec<PlanId>,
    /// Target completion time used by tardiness criteria.
    pub due_time: Option<Time>,
    tasks: Vec<Task>,
    index: FxHashMap<TaskId, usize>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new(id: PlanId, priority: i32) -> Self {
        Self {
            id,
            priority,
            successors: Vec::new(),
            due_time: None,
            tasks: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Set successor plans, dropping duplicates.
    pub fn with_successors(mut self, successors: impl IntoIterator<Item = PlanId>) -> Self {
        for succ in successors {
            if !self.successors.contains(&succ) {
                self.successors.push(succ);
            }
        }
        self
    }

    /// Set the due time used by tardiness criteria.
    pub fn with_due_time(mut self, due_time: Time) -> Self {
        self.due_time = Some(due_time);
        self
    }

    /// Add tasks in order, failing on the first invalid or duplicate one.
    pub fn with_tasks(
        mut self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Self, SchedulerError> {
        for task in tasks {
            self.add_task(task)?;
        }
        Ok(self)
    }

    /// Validate and append `task`. Rejects duplicate ids and tasks of
    /// another plan.
    pub fn add_task(&mut self, task: Task) -> Result<(), SchedulerError> {
        if task.plan_id != self.id {
            return Err(SchedulerError::InvalidTask {
                plan: self.id,
                task: task.id,
                reason: format!("task belongs to plan {}", task.plan_id),
            });
        }
        task.validate()?;
        if self.index.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask {
                plan: self.id,
                task: task.id,
            });
        }
        self.index.insert(task.id, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Look up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&idx| &self.tasks[idx])
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Sum of task processing times, saturating at `Time::MAX`.
    pub fn total_processing_time(&self) -> Time {
        self.tasks
            .iter()
            .fold(0, |total: Time, t| total.saturating_add(t.processing_time))
    }
}

/// A task placed at a starting time on its resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleAssignment {
    pub task: TaskKey,
    pub starting_time: Time,
    pub processing_time: Time,
    pub resource: ResourceId,
    pub demand: u32,
}

impl ScheduleAssignment {
    /// Assign `task` to start at `starting_time` on its own resource.
    pub fn new(task: &Task, starting_time: Time) -> Self {
        Self {
            task: task.key(),
            starting_time,
            processing_time: task.processing_time,
            resource: task.resource_id,
            demand: task.demand,
        }
    }

    /// Exclusive completion time, saturating at `Time::MAX`.
    pub fn end_time(&self) -> Time {
        self.starting_time.saturating_add(self.processing_time)
    }
}

/// Assignments committed so far, grouped by plan, over `[w_start, w_end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    w_start: Time,
    w_end: Time,
    plans: BTreeMap<PlanId, BTreeMap<TaskId, ScheduleAssignment>>,
    len: usize,
}

impl Schedule {
    /// Create an empty schedule for `[w_start, w_end)`.
    pub fn new(w_start: Time, w_end: Time) -> Result<Self, SchedulerError> {
        if w_start < 0 || w_start >= w_end {
            return Err(SchedulerError::InvalidBounds(format!(
                "window [{}, {}) requires 0 <= WStart < WEnd",
                w_start, w_end
            )));
        }
        Ok(Self {
            w_start,
            w_end,
            plans: BTreeMap::new(),
            len: 0,
        })
    }

    /// Inclusive window start.
    pub fn w_start(&self) -> Time {
        self.w_start
    }

    /// Exclusive window end.
    pub fn w_end(&self) -> Time {
        self.w_end
    }

    /// Commit an assignment. Rejects assignments outside the window and
    /// tasks that are already committed.
    pub fn commit(&mut self, assignment: ScheduleAssignment) -> Result<(), SchedulerError> {
        if assignment.starting_time < self.w_start || assignment.end_time() > self.w_end {
            return Err(SchedulerError::InfeasibleSchedule {
                task: assignment.task,
                reason: format!(
                    "[{}, {}) is outside the window [{}, {})",
                    assignment.starting_time,
                    assignment.end_time(),
                    self.w_start,
                    self.w_end
                ),
            });
        }
        let plan = self.plans.entry(assignment.task.plan).or_default();
        if plan.contains_key(&assignment.task.task) {
            return Err(SchedulerError::AlreadyCommitted(assignment.task));
        }
        plan.insert(assignment.task.task, assignment);
        self.len += 1;
        Ok(())
    }

    /// Assignment of `key`, if committed.
    pub fn assignment(&self, key: TaskKey) -> Option<&ScheduleAssignment> {
        self.plans.get(&key.plan)?.get(&key.task)
    }

    /// True if `key` has an assignment.
    pub fn is_committed(&self, key: TaskKey) -> bool {
        self.assignment(key).is_some()
    }

    /// Assignments of one plan, ordered by task id.
    pub fn plan_assignments(&self, plan: PlanId) -> impl Iterator<Item = &ScheduleAssignment> {
        self.plans.get(&plan).into_iter().flat_map(|m| m.values())
    }

    /// Number of committed tasks of `plan`.
    pub fn plan_len(&self, plan: PlanId) -> usize {
        self.plans.get(&plan).map_or(0, |m| m.len())
    }

    /// Plans with at least one assignment.
    pub fn plan_ids(&self) -> impl Iterator<Item = PlanId> + '_ {
        self.plans.keys().copied()
    }

    /// All assignments ordered by (plan, task).
    pub fn assignments(&self) -> impl Iterator<Item = &ScheduleAssignment> {
        self.plans.values().flat_map(|m| m.values())
    }

    /// All assignments ordered by (starting time, plan, task).
    pub fn assignments_by_start(&self) -> Vec<&ScheduleAssignment> {
        let mut all: Vec<&ScheduleAssignment> = self.assignments().collect();
        all.sort_by_key(|a| (a.starting_time, a.task));
        all
    }

    /// Latest completion time among a plan's committed tasks.
    pub fn plan_completion(&self, plan: PlanId) -> Option<Time> {
        self.plan_assignments(plan).map(|a| a.end_time()).max()
    }

    /// Latest completion time over all committed tasks.
    pub fn completion_time(&self) -> Option<Time> {
        self.assignments().map(|a| a.end_time()).max()
    }

    /// Span from `w_start` to the last completion (0 when empty).
    pub fn makespan(&self) -> Time {
        self.completion_time().map_or(0, |end| end - self.w_start)
    }

    /// Total number of assignments.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_duplicate_task() {
        let mut plan = Plan::new(1, 10);
        plan.add_task(Task::new(1, 1, 0, 0, 2)).unwrap();
        let err = plan.add_task(Task::new(1, 1, 0, 0, 3)).unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateTask { plan: 1, task: 1 });
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_plan_rejects_foreign_task() {
        let mut plan = Plan::new(1, 10);
        let err = plan.add_task(Task::new(1, 2, 0, 0, 2)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask { plan: 1, task: 1, .. }));
    }

    #[test]
    fn test_task_validation() {
        assert!(Task::new(1, 1, 0, 0, 0).validate().is_err());
        assert!(Task::new(1, 1, 0, -1, 2).validate().is_err());
        assert!(Task::new(1, 1, 0, 0, 2).with_demand(0).validate().is_err());
        assert!(Task::new(1, 1, 0, 0, 2).validate().is_ok());
    }

    #[test]
    fn test_plan_preserves_insertion_order() {
        let plan = Plan::new(1, 0)
            .with_tasks([
                Task::new(5, 1, 0, 0, 1),
                Task::new(2, 1, 0, 0, 1),
                Task::new(9, 1, 0, 0, 1),
            ])
            .unwrap();
        let ids: Vec<TaskId> = plan.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
        assert_eq!(plan.task(2).map(|t| t.id), Some(2));
        assert!(plan.task(3).is_none());
    }

    #[test]
    fn test_successors_deduplicated() {
        let task = Task::new(1, 1, 0, 0, 1).with_successors([2, 3, 2]);
        assert_eq!(task.successors, vec![2, 3]);
    }

    #[test]
    fn test_schedule_bounds() {
        assert!(Schedule::new(0, 10).is_ok());
        assert!(Schedule::new(5, 5).is_err());
        assert!(Schedule::new(-1, 5).is_err());
    }

    #[test]
    fn test_schedule_commit_and_queries() {
        let mut schedule = Schedule::new(0, 10).unwrap();
        let a = Task::new(1, 1, 0, 0, 3);
        let b = Task::new(2, 1, 0, 0, 2);
        schedule.commit(ScheduleAssignment::new(&a, 0)).unwrap();
        schedule.commit(ScheduleAssignment::new(&b, 4)).unwrap();

        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.plan_completion(1), Some(6));
        assert_eq!(schedule.makespan(), 6);
        assert!(schedule.is_committed(a.key()));

        let again = schedule.commit(ScheduleAssignment::new(&a, 5)).unwrap_err();
        assert_eq!(again, SchedulerError::AlreadyCommitted(a.key()));
    }

    #[test]
    fn test_schedule_commit_outside_window() {
        let mut schedule = Schedule::new(0, 10).unwrap();
        let a = Task::new(1, 1, 0, 0, 3);
        let err = schedule.commit(ScheduleAssignment::new(&a, 8)).unwrap_err();
        assert!(matches!(err, SchedulerError::InfeasibleSchedule { .. }));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_assignments_by_start() {
        let mut schedule = Schedule::new(0, 20).unwrap();
        schedule
            .commit(ScheduleAssignment::new(&Task::new(1, 2, 0, 0, 1), 5))
            .unwrap();
        schedule
            .commit(ScheduleAssignment::new(&Task::new(1, 1, 0, 0, 1), 7))
            .unwrap();
        schedule
            .commit(ScheduleAssignment::new(&Task::new(2, 1, 0, 0, 1), 0))
            .unwrap();
        let starts: Vec<Time> = schedule
            .assignments_by_start()
            .iter()
            .map(|a| a.starting_time)
            .collect();
        assert_eq!(starts, vec![0, 5, 7]);
    }
}
