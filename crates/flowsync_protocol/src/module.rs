//! Application modules that exchange cross-module updates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An application module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Task list.
    Tasks,
    /// Time blocking / scheduling.
    TimeBlocks,
    /// Energy tracking.
    Energy,
    /// Time logs.
    TimeTracking,
    /// Calendar view.
    Calendar,
    /// Dashboard widgets.
    Dashboard,
    /// Habit tracker.
    Habits,
    /// Pomodoro timer.
    Pomodoro,
    /// The sync layer itself.
    Sync,
}

impl Module {
    /// All modules, in declaration order.
    pub const ALL: [Module; 9] = [
        Module::Tasks,
        Module::TimeBlocks,
        Module::Energy,
        Module::TimeTracking,
        Module::Calendar,
        Module::Dashboard,
        Module::Habits,
        Module::Pomodoro,
        Module::Sync,
    ];

    /// Returns the wire name of this module.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Tasks => "tasks",
            Module::TimeBlocks => "time_blocks",
            Module::Energy => "energy",
            Module::TimeTracking => "time_tracking",
            Module::Calendar => "calendar",
            Module::Dashboard => "dashboard",
            Module::Habits => "habits",
            Module::Pomodoro => "pomodoro",
            Module::Sync => "sync",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recipients of a cross-module update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Targets {
    /// Every module.
    All,
    /// An explicit set of modules.
    Modules(BTreeSet<Module>),
}

impl Targets {
    /// Creates a target set from a list of modules.
    pub fn modules(modules: impl IntoIterator<Item = Module>) -> Self {
        Targets::Modules(modules.into_iter().collect())
    }

    /// Creates a target set with a single module.
    pub fn only(module: Module) -> Self {
        Self::modules([module])
    }

    /// Returns true if `module` is a recipient.
    pub fn includes(&self, module: Module) -> bool {
        match self {
            Targets::All => true,
            Targets::Modules(set) => set.contains(&module),
        }
    }

    /// Returns true if no module would receive the update.
    pub fn is_empty(&self) -> bool {
        matches!(self, Targets::Modules(set) if set.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_targets() {
        let targets = Targets::modules([Module::Calendar, Module::Dashboard]);
        assert!(targets.includes(Module::Calendar));
        assert!(!targets.includes(Module::Tasks));
        assert!(!targets.is_empty());
    }

    #[test]
    fn all_targets_everything() {
        assert!(Targets::All.includes(Module::Energy));
        assert!(!Targets::All.is_empty());
        assert!(Targets::modules([]).is_empty());
    }
}
