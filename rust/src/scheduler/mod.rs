//! Schedule construction and tabu search.
//!
//! A build attempt walks a visiting order and places tasks on the resource
//! timeline; the tabu search drives repeated attempts with perturbed orders
//! and release times until a feasible schedule is found or a budget runs out.

mod builder;
mod listener;
mod moves;
mod search;
mod state;
mod tabu;
mod timeline;

pub use builder::{Blocker, BuildReport, ScheduleBuilder};
pub use listener::{SchedulerListener, SolutionLog};
pub use moves::{generate as generate_moves, Perturbation};
pub use search::{CancelToken, SearchNode, SearchOutcome, SearchPath, TabuSearch, Termination};
pub use state::{BuildState, TaskStatus};
pub use tabu::{TabuList, TabuListEntry};
pub use timeline::{Event, ResourceTimeline, TimelineError};
