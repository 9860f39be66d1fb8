//! Executable behavior attached to tasks.
//!
//! Scheduling never looks at this module. An [`Executor`] maps task keys to
//! actions and replays a finished schedule in start order.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Schedule, Task, TaskKey, Time};
use crate::problem::Problem;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Task {0} has no registered action")]
    MissingAction(TaskKey),
    #[error("Task {0} is not part of the problem")]
    UnknownTask(TaskKey),
    #[error("Task {task} failed at {at}: {reason}")]
    Failed {
        task: TaskKey,
        at: Time,
        reason: String,
    },
}

pub trait TaskAction: Send + Sync {
    fn execute(&self, task: &Task, at: Time) -> Result<(), ExecutionError>;
}

impl<F> TaskAction for F
where
    F: Fn(&Task, Time) -> Result<(), ExecutionError> + Send + Sync,
{
    fn execute(&self, task: &Task, at: Time) -> Result<(), ExecutionError> {
        self(task, at)
    }
}

/// Registry of task actions.
#[derive(Default, Clone)]
pub struct Executor {
    actions: FxHashMap<TaskKey, Arc<dyn TaskAction>>,
    /// Tasks without an action are skipped instead of failing the run.
    pub skip_missing: bool,
}

impl Executor {
    /// Create an executor with no actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `action` to `key`, replacing any earlier one.
    pub fn register(&mut self, key: TaskKey, action: impl TaskAction + 'static) {
        self.actions.insert(key, Arc::new(action));
    }

    /// Skip tasks without an action instead of failing.
    pub fn with_skip_missing(mut self, skip: bool) -> Self {
        self.skip_missing = skip;
        self
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the actions of `schedule` in (start, plan, task) order, stopping
    /// at the first failure. Returns the keys that ran.
    pub fn run(
        &self,
        problem: &Problem,
        schedule: &Schedule,
    ) -> Result<Vec<TaskKey>, ExecutionError> {
        let mut ran = Vec::with_capacity(schedule.len());
        for assignment in schedule.assignments_by_start() {
            let key = assignment.task;
            let task = problem
                .task(key)
                .ok_or(ExecutionError::UnknownTask(key))?;
            match self.actions.get(&key) {
                Some(action) => {
                    action.execute(task, assignment.starting_time)?;
                    ran.push(key);
                }
                None if self.skip_missing => continue,
                None => return Err(ExecutionError::MissingAction(key)),
            }
        }
        Ok(ran)
    }
}
