//! Tabu search over build attempts.
//!
//! The search keeps a single append-only trail of [`SearchNode`]s. Each
//! iteration generates admissible perturbations of the current node,
//! evaluates every branch as an independent build from a cloned seed state
//! (in parallel on the rayon pool when enabled), merges the results in
//! generation order and appends the best branch. The perturbed task becomes
//! tabu for `tabu_wait_turns` iterations. With no admissible move left the
//! trail backtracks one node.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::models::{Schedule, TaskKey, Time};
use crate::objective::{Cost, ObjectiveEvaluator};
use crate::problem::Problem;
use crate::{log_changes, log_checks, log_debug};

use super::builder::{BuildReport, ScheduleBuilder};
use super::listener::SchedulerListener;
use super::moves::{self, Perturbation};
use super::state::BuildState;
use super::tabu::TabuList;

/// Shared flag that stops a running search at its next iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the search to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    /// True once `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why the search stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// A complete feasible schedule was found and the improvement budget
    /// ran out.
    Feasible,
    /// No admissible move remains anywhere on the trail.
    Exhausted,
    IterationBudget,
    MoveBudget,
    TimeBudget,
    Cancelled,
    /// Some task cannot fit the window even on idle resources.
    Unsatisfiable,
}

/// One state of the trail: the inputs of a build attempt and its result.
#[derive(Clone, Debug)]
pub struct SearchNode {
    pub depth: usize,
    /// Perturbation that produced this node from its parent (none at the root).
    pub perturbation: Option<Perturbation>,
    pub order: Vec<TaskKey>,
    pub release_overrides: FxHashMap<TaskKey, Time>,
    pub schedule: Schedule,
    pub cost: Cost,
    pub report: BuildReport,
    /// Complete and free of violations.
    pub feasible: bool,
}

impl SearchNode {
    /// Number of tasks this attempt left out.
    pub fn unscheduled(&self) -> usize {
        self.report.deferred.len()
    }

    fn rank(&self) -> (usize, Cost) {
        (self.unscheduled(), self.cost)
    }

    fn outcome_rank(&self) -> (bool, usize, Cost) {
        (!self.feasible, self.unscheduled(), self.cost)
    }
}

/// Append-only backtracking trail.
#[derive(Clone, Debug, Default)]
pub struct SearchPath {
    nodes: Vec<SearchNode>,
}

impl SearchPath {
    /// Start a trail at `root`.
    pub fn new(root: SearchNode) -> Self {
        Self { nodes: vec![root] }
    }

    /// Append a node on top of the current one.
    pub fn push(&mut self, node: SearchNode) {
        self.nodes.push(node);
    }

    /// Drop the newest node. The root is never dropped.
    pub fn backtrack(&mut self) -> Option<SearchNode> {
        if self.nodes.len() > 1 {
            self.nodes.pop()
        } else {
            None
        }
    }

    /// Newest node of the trail.
    pub fn current(&self) -> Option<&SearchNode> {
        self.nodes.last()
    }

    /// Nodes from root to current.
    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Perturbations applied from the root to the current node.
    pub fn perturbations(&self) -> Vec<Perturbation> {
        self.nodes.iter().filter_map(|n| n.perturbation).collect()
    }
}

/// Result of [`TabuSearch::run`].
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// Best feasible node, else the node with the fewest unscheduled tasks.
    pub best: SearchNode,
    /// Perturbations leading from the root to `best`.
    pub trail: Vec<Perturbation>,
    /// Every perturbation appended to the trail, with the iteration that
    /// chose it. Backtracking does not remove entries.
    pub history: Vec<(usize, Perturbation)>,
    pub iterations: usize,
    pub moves_evaluated: usize,
    pub termination: Termination,
}

pub struct TabuSearch<'a> {
    problem: &'a Problem,
    config: &'a EngineConfig,
    evaluator: ObjectiveEvaluator<'a>,
    listeners: &'a [Arc<dyn SchedulerListener>],
    cancel: &'a CancelToken,
    seed: BuildState,
}

impl<'a> TabuSearch<'a> {
    /// Create a search over `problem`. Listeners hear about every strictly
    /// improving feasible schedule; `cancel` stops the run between iterations.
    pub fn new(
        problem: &'a Problem,
        config: &'a EngineConfig,
        listeners: &'a [Arc<dyn SchedulerListener>],
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            problem,
            config,
            evaluator: ObjectiveEvaluator::new(problem, &config.criteria),
            listeners,
            cancel,
            seed: BuildState::new(problem),
        }
    }

    /// Build one attempt from the parent's inputs plus `perturbation`.
    /// Returns `None` if the perturbation changes nothing.
    fn branch(&self, parent: &SearchNode, perturbation: Perturbation) -> Option<SearchNode> {
        let mut order = parent.order.clone();
        let mut release_overrides = parent.release_overrides.clone();
        if !perturbation.apply(self.problem, &mut order, &mut release_overrides) {
            return None;
        }
        Some(self.build(
            order,
            release_overrides,
            Some(perturbation),
            parent.depth + 1,
        ))
    }

    fn build(
        &self,
        order: Vec<TaskKey>,
        release_overrides: FxHashMap<TaskKey, Time>,
        perturbation: Option<Perturbation>,
        depth: usize,
    ) -> SearchNode {
        let mut state = self.seed.clone_for_branch();
        state.order = order;
        state.release_overrides = release_overrides;

        let report = ScheduleBuilder::new(self.problem, self.config).build_schedule(&mut state);
        let cost = self.evaluator.evaluate(&state.schedule);
        let feasible = report.complete && self.problem.verify(&state.schedule).is_empty();
        log_debug!(
            self.config.verbosity,
            "  Branch {}: {} unscheduled, cost {:.3}",
            perturbation.map_or_else(|| "root".to_string(), |p| p.to_string()),
            report.deferred.len(),
            cost.value
        );

        SearchNode {
            depth,
            perturbation,
            order: state.order,
            release_overrides: state.release_overrides,
            schedule: state.schedule,
            cost,
            report,
            feasible,
        }
    }

    fn notify(&self, node: &SearchNode) {
        log_changes!(
            self.config.verbosity,
            "New best schedule at depth {}: cost {:.3}, makespan {}",
            node.depth,
            node.cost.value,
            node.cost.makespan
        );
        for listener in self.listeners {
            listener.solution_generated(&node.schedule, &node.cost);
        }
    }

    /// Run until a budget, the cancel token or the move supply stops it.
    pub fn run(&self) -> SearchOutcome {
        let verbosity = self.config.verbosity;
        let budget = &self.config.budget;
        let started = Instant::now();

        let root = self.build(
            self.problem.visiting_order().to_vec(),
            FxHashMap::default(),
            None,
            0,
        );

        let mut best = root.clone();
        let mut best_trail: Vec<Perturbation> = Vec::new();
        let mut best_feasible: Option<Cost> = None;
        if root.feasible {
            best_feasible = Some(root.cost);
            self.notify(&root);
        }

        let mut iterations = 0;
        let mut moves_evaluated = 0;

        let hopeless = self.problem.bounds().trivially_infeasible();
        if !hopeless.is_empty() {
            log_checks!(
                verbosity,
                "{} task(s) cannot fit the window, first is {}",
                hopeless.len(),
                hopeless[0]
            );
            return SearchOutcome {
                best,
                trail: best_trail,
                history: Vec::new(),
                iterations,
                moves_evaluated,
                termination: Termination::Unsatisfiable,
            };
        }

        let mut path = SearchPath::new(root);
        let mut tabu = TabuList::new();
        let mut history = Vec::new();
        let mut stale = 0;

        let termination = loop {
            if best_feasible.is_some() && stale >= budget.improvement_iterations {
                break Termination::Feasible;
            }
            if self.cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            if budget.time_limit.is_some_and(|limit| started.elapsed() >= limit) {
                break Termination::TimeBudget;
            }
            if iterations >= budget.max_iterations {
                break Termination::IterationBudget;
            }
            if moves_evaluated >= budget.max_moves {
                break Termination::MoveBudget;
            }
            iterations += 1;

            let Some(current) = path.current() else {
                break Termination::Exhausted;
            };
            let limit = self
                .config
                .branching_factor
                .min(budget.max_moves - moves_evaluated);
            let candidates = moves::generate(
                self.problem,
                &current.order,
                &current.schedule,
                &current.report,
                |key| !tabu.is_tabu(key),
                limit,
            );

            if candidates.is_empty() {
                log_checks!(
                    verbosity,
                    "No admissible move at depth {} ({} tabu)",
                    current.depth,
                    tabu.len()
                );
                tabu.tick();
                stale += 1;
                if path.backtrack().is_none() && tabu.is_empty() {
                    break Termination::Exhausted;
                }
                continue;
            }

            let branches: Vec<Option<SearchNode>> = if self.config.parallel_branches {
                candidates
                    .par_iter()
                    .map(|&m| self.branch(current, m))
                    .collect()
            } else {
                candidates.iter().map(|&m| self.branch(current, m)).collect()
            };
            moves_evaluated += candidates.len();

            let prefix = path.perturbations();
            let mut improved = false;
            let mut chosen: Option<SearchNode> = None;
            for node in branches.into_iter().flatten() {
                let trail = || {
                    let mut trail = prefix.clone();
                    trail.extend(node.perturbation);
                    trail
                };
                if node.feasible && best_feasible.map_or(true, |c| node.cost < c) {
                    best_feasible = Some(node.cost);
                    improved = true;
                    self.notify(&node);
                }
                if node.outcome_rank() < best.outcome_rank() {
                    best = node.clone();
                    best_trail = trail();
                }
                if chosen.as_ref().map_or(true, |c| node.rank() < c.rank()) {
                    chosen = Some(node);
                }
            }

            match chosen {
                Some(next) => {
                    if let Some(p) = next.perturbation {
                        log_changes!(
                            verbosity,
                            "Depth {}: {} ({} unscheduled)",
                            next.depth,
                            p,
                            next.unscheduled()
                        );
                        tabu.mark(p.subject(), self.config.tabu_wait_turns);
                        history.push((iterations, p));
                    }
                    path.push(next);
                }
                None => {
                    for m in &candidates {
                        tabu.mark(m.subject(), self.config.tabu_wait_turns);
                    }
                }
            }
            tabu.tick();
            stale = if improved { 0 } else { stale + 1 };
        };

        log_changes!(
            verbosity,
            "Search stopped ({:?}) after {} iterations, {} branches",
            termination,
            iterations,
            moves_evaluated
        );

        SearchOutcome {
            best,
            trail: best_trail,
            history,
            iterations,
            moves_evaluated,
            termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchBudget;
    use crate::models::{Plan, Task};
    use crate::scheduler::listener::SolutionLog;
    use std::time::Duration;

    /// Resource 0 is taken by plan 2 first, pushing plan 1's long second
    /// step past the window end unless plan 1 goes first.
    fn contested(config: &EngineConfig) -> Problem {
        let blocker = Plan::new(2, 0)
            .with_tasks([Task::new(1, 2, 0, 0, 2)])
            .unwrap();
        let victim = Plan::new(1, 0)
            .with_tasks([
                Task::new(1, 1, 0, 0, 2).with_successors([2]),
                Task::new(2, 1, 1, 0, 4),
            ])
            .unwrap();
        Problem::new(vec![blocker, victim], config).unwrap()
    }

    /// Three single-task plans needing 9 time units of resource 0 inside a
    /// window of 8: never feasible, but every attempt leaves moves to try.
    fn overbooked(config: &EngineConfig) -> Problem {
        let plans = (1..=3)
            .map(|id| {
                Plan::new(id, 0)
                    .with_tasks([Task::new(1, id, 0, 0, 3)])
                    .unwrap()
            })
            .collect();
        Problem::new(plans, config).unwrap()
    }

    fn run(problem: &Problem, config: &EngineConfig) -> SearchOutcome {
        let cancel = CancelToken::new();
        TabuSearch::new(problem, config, &[], &cancel).run()
    }

    #[test]
    fn test_one_move_repairs_contested_resource() {
        let config = EngineConfig::default().with_window(0, 6);
        let problem = contested(&config);
        let log = Arc::new(SolutionLog::new());
        let listener: Arc<dyn SchedulerListener> = log.clone();
        let listeners = vec![listener];
        let cancel = CancelToken::new();
        let outcome = TabuSearch::new(&problem, &config, &listeners, &cancel).run();

        assert_eq!(outcome.termination, Termination::Feasible);
        assert!(outcome.best.feasible);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.moves_evaluated, 2);
        assert_eq!(
            outcome.trail,
            vec![Perturbation::Promote {
                task: TaskKey::new(1, 1),
                ahead_of: TaskKey::new(2, 1),
            }]
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let config = EngineConfig::default().with_window(0, 6);
        let problem = contested(&config);
        let parallel = run(&problem, &config);
        let sequential_config = config.clone().with_parallel_branches(false);
        let sequential = run(&problem, &sequential_config);
        assert_eq!(parallel.trail, sequential.trail);
        assert_eq!(parallel.best.schedule, sequential.best.schedule);
        assert_eq!(parallel.best.cost, sequential.best.cost);
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let config = EngineConfig::default().with_window(0, 6);
        let problem = contested(&config);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = TabuSearch::new(&problem, &config, &[], &cancel).run();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.iterations, 0);
        assert!(!outcome.best.feasible);
        assert_eq!(outcome.best.unscheduled(), 1);
    }

    #[test]
    fn test_iteration_budget() {
        let budget = SearchBudget {
            max_iterations: 0,
            ..SearchBudget::default()
        };
        let config = EngineConfig::default()
            .with_window(0, 6)
            .with_budget(budget);
        let problem = contested(&config);
        assert_eq!(run(&problem, &config).termination, Termination::IterationBudget);
    }

    #[test]
    fn test_unsatisfiable_stops_early() {
        let config = EngineConfig::default().with_window(0, 5);
        let plan = Plan::new(1, 0)
            .with_tasks([Task::new(1, 1, 0, 4, 3)])
            .unwrap();
        let problem = Problem::new(vec![plan], &config).unwrap();
        let outcome = run(&problem, &config);
        assert_eq!(outcome.termination, Termination::Unsatisfiable);
        assert_eq!(outcome.moves_evaluated, 0);
        assert!(outcome.best.schedule.is_empty());
    }

    #[test]
    fn test_feasible_root_needs_no_moves() {
        let config = EngineConfig::default();
        let problem = contested(&config);
        let outcome = run(&problem, &config);
        assert_eq!(outcome.termination, Termination::Feasible);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.trail.is_empty());
    }

    #[test]
    fn test_search_path_keeps_root() {
        let config = EngineConfig::default();
        let problem = contested(&config);
        let cancel = CancelToken::new();
        let search = TabuSearch::new(&problem, &config, &[], &cancel);
        let root = search.build(
            problem.visiting_order().to_vec(),
            FxHashMap::default(),
            None,
            0,
        );
        let promote = Perturbation::Promote {
            task: TaskKey::new(1, 1),
            ahead_of: TaskKey::new(2, 1),
        };
        let child = search.branch(&root, promote).unwrap();
        assert_eq!(child.depth, 1);
        // Applying the same promotion again changes nothing.
        assert!(search.branch(&child, promote).is_none());

        let mut path = SearchPath::new(root);
        path.push(child);
        assert_eq!(path.perturbations(), vec![promote]);
        assert!(path.backtrack().is_some());
        assert!(path.backtrack().is_none());
        assert_eq!(path.len(), 1);
    }

    #[test]
    fn test_perturbed_task_waits_out_its_cooldown() {
        let wait_turns = 2;
        let budget = SearchBudget {
            max_iterations: 8,
            ..SearchBudget::default()
        };
        let config = EngineConfig::default()
            .with_window(0, 8)
            .with_budget(budget)
            .with_tabu_wait_turns(wait_turns)
            .with_parallel_branches(false);
        let problem = overbooked(&config);
        let outcome = run(&problem, &config);

        assert_eq!(outcome.termination, Termination::IterationBudget);
        assert!(!outcome.best.feasible);
        let iterations: Vec<usize> = outcome.history.iter().map(|(i, _)| *i).collect();
        assert_eq!(iterations, (1..=8).collect::<Vec<_>>());

        let mut last_chosen: FxHashMap<TaskKey, usize> = FxHashMap::default();
        let mut gaps = Vec::new();
        for &(iteration, perturbation) in &outcome.history {
            if let Some(previous) = last_chosen.insert(perturbation.subject(), iteration) {
                gaps.push(iteration - previous);
            }
        }
        assert!(!gaps.is_empty());
        assert!(gaps.iter().all(|&gap| gap >= wait_turns as usize));
        // The cooldown runs out after exactly `wait_turns` iterations.
        assert!(gaps.contains(&(wait_turns as usize)));
    }

    #[test]
    fn test_move_budget_caps_branches() {
        let budget = SearchBudget {
            max_moves: 4,
            ..SearchBudget::default()
        };
        let config = EngineConfig::default()
            .with_window(0, 8)
            .with_budget(budget);
        let problem = overbooked(&config);
        let outcome = run(&problem, &config);

        assert_eq!(outcome.termination, Termination::MoveBudget);
        assert_eq!(outcome.moves_evaluated, 4);
        assert_eq!(outcome.iterations, 2);
    }

    #[test]
    fn test_time_budget() {
        let budget = SearchBudget {
            time_limit: Some(Duration::ZERO),
            ..SearchBudget::default()
        };
        let config = EngineConfig::default()
            .with_window(0, 6)
            .with_budget(budget);
        let problem = contested(&config);
        let outcome = run(&problem, &config);

        assert_eq!(outcome.termination, Termination::TimeBudget);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn test_exhausted_without_moves() {
        let plan = Plan::new(1, 0)
            .with_tasks([Task::new(1, 1, 0, 0, 2).with_demand(2)])
            .unwrap();
        let config = EngineConfig::default();
        let problem = Problem::new(vec![plan], &config).unwrap();
        let outcome = run(&problem, &config);

        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.moves_evaluated, 0);
        assert_eq!(outcome.best.unscheduled(), 1);
    }
}
