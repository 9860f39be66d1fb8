//! Cooldown list for rejected placements and perturbed tasks.

use std::collections::BTreeMap;

use crate::models::{PlanId, TaskId, TaskKey};

/// A task that may not be re-selected for `wait_turns` more turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TabuListEntry {
    pub task: TaskId,
    pub plan: PlanId,
    pub wait_turns: u32,
}

/// Active cooldowns keyed by task. A key marked with `k` turns is admissible
/// again after `k` calls to [`TabuList::tick`].
#[derive(Clone, Debug, Default)]
pub struct TabuList {
    entries: BTreeMap<TaskKey, u32>,
}

impl TabuList {
    /// Create an empty tabu list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the cooldown of `key`. A refresh never shortens an
    /// active cooldown.
    pub fn mark(&mut self, key: TaskKey, wait_turns: u32) {
        if wait_turns == 0 {
            return;
        }
        let turns = self.entries.entry(key).or_insert(0);
        *turns = (*turns).max(wait_turns);
    }

    /// True while `key` is cooling down.
    pub fn is_tabu(&self, key: TaskKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Remaining turns for `key`, 0 when admissible.
    pub fn wait_turns(&self, key: TaskKey) -> u32 {
        self.entries.get(&key).copied().unwrap_or(0)
    }

    /// Decrement every active cooldown by one, dropping those that reach zero.
    pub fn tick(&mut self) {
        self.entries.retain(|_, turns| {
            *turns -= 1;
            *turns > 0
        });
    }

    /// End the cooldown of `key` early.
    pub fn release(&mut self, key: TaskKey) {
        self.entries.remove(&key);
    }

    /// Drop every cooldown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Active entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = TabuListEntry> + '_ {
        self.entries.iter().map(|(key, &wait_turns)| TabuListEntry {
            task: key.task,
            plan: key.plan,
            wait_turns,
        })
    }

    /// Number of tasks cooling down.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
