//! Resource timeline: per-resource, time-ordered capacity events.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included, Unbounded};
use thiserror::Error;

use crate::config::Capacities;
use crate::models::{ResourceId, TaskKey, Time};

/// Errors raised when a placement is rejected. A rejected placement never
/// mutates the timeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("Resource {resource} has residual {residual} at time {time}, task needs {demand}")]
    CapacityExceeded {
        resource: ResourceId,
        time: Time,
        residual: u32,
        demand: u32,
    },
    #[error("Empty interval [{start}, {end})")]
    EmptyInterval { start: Time, end: Time },
    #[error("Task {0} is already on the timeline")]
    AlreadyPlaced(TaskKey),
    #[error("Interval from {start} of length {processing} overflows the time axis")]
    OutOfRange { start: Time, processing: Time },
}

/// A capacity-changing instant on one resource.
///
/// `residual_capacity` holds from `time` up to the next event of the same
/// resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub time: Time,
    pub resource: ResourceId,
    pub residual_capacity: u32,
    pub starting: BTreeSet<TaskKey>,
    pub terminating: BTreeSet<TaskKey>,
}

impl Event {
    fn new(time: Time, resource: ResourceId, residual_capacity: u32) -> Self {
        Self {
            time,
            resource,
            residual_capacity,
            starting: BTreeSet::new(),
            terminating: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct ResourceEvents {
    capacity: u32,
    /// Invariant: keyed by time, one event per instant.
    events: BTreeMap<Time, Event>,
    last_end: Option<Time>,
}

impl ResourceEvents {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            events: BTreeMap::new(),
            last_end: None,
        }
    }

    fn residual_at(&self, time: Time) -> u32 {
        self.events
            .range(..=time)
            .next_back()
            .map_or(self.capacity, |(_, e)| e.residual_capacity)
    }

    fn fits(&self, start: Time, end: Time, demand: u32) -> Result<(), (Time, u32)> {
        let at_start = self.residual_at(start);
        if at_start < demand {
            return Err((start, at_start));
        }
        for (&time, event) in self.events.range((Excluded(start), Excluded(end))) {
            if event.residual_capacity < demand {
                return Err((time, event.residual_capacity));
            }
        }
        Ok(())
    }
}

/// Sweep-line view of resource usage.
///
/// Every query is a range lookup on a per-resource `BTreeMap`, so it costs
/// O(log n) in the number of events on that resource.
#[derive(Clone, Debug)]
pub struct ResourceTimeline {
    capacities: Capacities,
    resources: FxHashMap<ResourceId, ResourceEvents>,
    /// task -> (resource, time of its terminate event)
    terminations: FxHashMap<TaskKey, (ResourceId, Time)>,
}

impl ResourceTimeline {
    /// Create an empty timeline with the given per-resource capacities.
    pub fn new(capacities: Capacities) -> Self {
        Self {
            capacities,
            resources: FxHashMap::default(),
            terminations: FxHashMap::default(),
        }
    }

    /// Full capacity of `resource`.
    pub fn capacity(&self, resource: ResourceId) -> u32 {
        self.capacities.of(resource)
    }

    /// Insert an event at `time` if absent and return the event at that key.
    ///
    /// A new event inherits the residual capacity in effect at `time`.
    pub fn insert_event(&mut self, time: Time, resource: ResourceId) -> &Event {
        let capacity = self.capacities.of(resource);
        let entry = self
            .resources
            .entry(resource)
            .or_insert_with(|| ResourceEvents::new(capacity));
        let carried = entry.residual_at(time);
        entry
            .events
            .entry(time)
            .or_insert_with(|| Event::new(time, resource, carried))
    }

    /// Event at exactly `(time, resource)`, if any.
    pub fn event(&self, time: Time, resource: ResourceId) -> Option<&Event> {
        self.resources.get(&resource)?.events.get(&time)
    }

    /// First event of the same resource strictly after `after`.
    pub fn next_event(&self, after: &Event) -> Option<&Event> {
        self.resources
            .get(&after.resource)?
            .events
            .range((Excluded(after.time), Unbounded))
            .next()
            .map(|(_, e)| e)
    }

    /// Last event before `time`, or at `time` when `inclusive`.
    pub fn previous_event(
        &self,
        resource: ResourceId,
        time: Time,
        inclusive: bool,
    ) -> Option<&Event> {
        let upper = if inclusive {
            Included(time)
        } else {
            Excluded(time)
        };
        self.resources
            .get(&resource)?
            .events
            .range((Unbounded, upper))
            .next_back()
            .map(|(_, e)| e)
    }

    /// Latest event of `resource` with time `<= time`.
    pub fn last_event_at_or_before(&self, resource: ResourceId, time: Time) -> Option<&Event> {
        self.previous_event(resource, time, true)
    }

    /// The latest event whose terminating set contains `task`.
    pub fn last_event_where_task_terminates(&self, task: TaskKey) -> Option<&Event> {
        let &(resource, time) = self.terminations.get(&task)?;
        self.event(time, resource)
    }

    /// Residual capacity in effect at `time`.
    pub fn residual_at(&self, resource: ResourceId, time: Time) -> u32 {
        match self.resources.get(&resource) {
            Some(r) => r.residual_at(time),
            None => self.capacities.of(resource),
        }
    }

    /// Latest terminate time of any task placed on `resource`.
    pub fn last_end(&self, resource: ResourceId) -> Option<Time> {
        self.resources.get(&resource)?.last_end
    }

    /// Events of `resource` in time order.
    pub fn events(&self, resource: ResourceId) -> impl Iterator<Item = &Event> {
        self.resources
            .get(&resource)
            .into_iter()
            .flat_map(|r| r.events.values())
    }

    /// Resources with at least one event.
    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.resources.keys().copied()
    }

    /// True if `task` has been placed.
    pub fn contains(&self, task: TaskKey) -> bool {
        self.terminations.contains_key(&task)
    }

    /// True if `[start, start + processing)` has at least `demand` residual
    /// capacity throughout.
    pub fn can_place(
        &self,
        resource: ResourceId,
        start: Time,
        processing: Time,
        demand: u32,
    ) -> bool {
        let Some(end) = start.checked_add(processing) else {
            return false;
        };
        if processing <= 0 {
            return false;
        }
        match self.resources.get(&resource) {
            Some(r) => r.fits(start, end, demand).is_ok(),
            None => demand <= self.capacities.of(resource),
        }
    }

    /// Earliest start `>= lower_bound` where the task fits and ends by
    /// `horizon_end`.
    ///
    /// Residual capacity only rises at event times, so the candidates are the
    /// lower bound itself and every later event.
    pub fn earliest_fit(
        &self,
        resource: ResourceId,
        lower_bound: Time,
        processing: Time,
        demand: u32,
        horizon_end: Time,
    ) -> Option<Time> {
        if processing <= 0 || demand > self.capacities.of(resource) {
            return None;
        }
        let later_events = self
            .resources
            .get(&resource)
            .into_iter()
            .flat_map(|r| r.events.range((Excluded(lower_bound), Unbounded)))
            .map(|(&t, _)| t);

        for candidate in std::iter::once(lower_bound).chain(later_events) {
            match candidate.checked_add(processing) {
                Some(end) if end <= horizon_end => {}
                _ => return None,
            }
            if self.can_place(resource, candidate, processing, demand) {
                return Some(candidate);
            }
        }
        None
    }

    /// Place a task on `resource` over `[start, start + processing)`.
    ///
    /// Ensures the start and terminate events exist, records the task in
    /// their sets and lowers the residual capacity of every event in
    /// `[start, end)` by `demand`. Rejected without mutation if any residual
    /// would go negative.
    pub fn place(
        &mut self,
        task: TaskKey,
        resource: ResourceId,
        start: Time,
        processing: Time,
        demand: u32,
    ) -> Result<(), TimelineError> {
        if processing <= 0 {
            return Err(TimelineError::EmptyInterval {
                start,
                end: start.saturating_add(processing),
            });
        }
        let Some(end) = start.checked_add(processing) else {
            return Err(TimelineError::OutOfRange { start, processing });
        };
        if self.terminations.contains_key(&task) {
            return Err(TimelineError::AlreadyPlaced(task));
        }

        let capacity = self.capacities.of(resource);
        let check = match self.resources.get(&resource) {
            Some(r) => r.fits(start, end, demand),
            None if demand <= capacity => Ok(()),
            None => Err((start, capacity)),
        };
        if let Err((time, residual)) = check {
            return Err(TimelineError::CapacityExceeded {
                resource,
                time,
                residual,
                demand,
            });
        }

        // End first: its carried residual must be read before the range
        // below is lowered.
        self.insert_event(end, resource);
        self.insert_event(start, resource);

        let Some(entry) = self.resources.get_mut(&resource) else {
            return Err(TimelineError::EmptyInterval { start, end });
        };
        for event in entry.events.range_mut(start..end).map(|(_, e)| e) {
            event.residual_capacity -= demand;
        }
        if let Some(event) = entry.events.get_mut(&start) {
            event.starting.insert(task);
        }
        if let Some(event) = entry.events.get_mut(&end) {
            event.terminating.insert(task);
        }
        entry.last_end = Some(entry.last_end.map_or(end, |last| last.max(end)));
        self.terminations.insert(task, (resource, end));
        Ok(())
    }
}
