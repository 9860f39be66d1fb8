//! Notifications for improving schedules.

use std::sync::Mutex;

use crate::models::Schedule;
use crate::objective::Cost;

/// Receives every complete feasible schedule that improves on the best one
/// seen so far, in discovery order.
///
/// Called synchronously from the search loop; implementations must return
/// quickly.
pub trait SchedulerListener: Send + Sync {
    fn solution_generated(&self, schedule: &Schedule, cost: &Cost);
}

/// Listener that keeps a copy of every notified schedule.
#[derive(Debug, Default)]
pub struct SolutionLog {
    solutions: Mutex<Vec<(Schedule, Cost)>>,
}

impl SolutionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications received.
    pub fn len(&self) -> usize {
        self.solutions.lock().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Costs in notification order.
    pub fn costs(&self) -> Vec<Cost> {
        self.solutions
            .lock()
            .map(|s| s.iter().map(|(_, c)| *c).collect())
            .unwrap_or_default()
    }

    /// Most recent schedule and its cost.
    pub fn last(&self) -> Option<(Schedule, Cost)> {
        self.solutions.lock().ok()?.last().cloned()
    }
}

impl SchedulerListener for SolutionLog {
    fn solution_generated(&self, schedule: &Schedule, cost: &Cost) {
        if let Ok(mut solutions) = self.solutions.lock() {
            solutions.push((schedule.clone(), *cost));
        }
    }
}
