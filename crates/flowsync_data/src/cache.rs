//! Local entity cache.

use flowsync_protocol::{
    EntityPayload, HabitEntryRecord, PomodoroSessionRecord, TaskRecord, TimeBlockRecord,
};
use std::collections::HashMap;

/// Latest local version of every entity the data layer wrote or was given.
#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    tasks: HashMap<String, TaskRecord>,
    time_blocks: HashMap<String, TimeBlockRecord>,
    habit_entries: HashMap<String, HabitEntryRecord>,
    pomodoro_sessions: HashMap<String, PomodoroSessionRecord>,
}

impl EntityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn put(&mut self, payload: EntityPayload) {
        match payload {
            EntityPayload::Task(r) => {
                self.tasks.insert(r.id.clone(), r);
            }
            EntityPayload::TimeBlock(r) => {
                self.time_blocks.insert(r.id.clone(), r);
            }
            EntityPayload::HabitEntry(r) => {
                self.habit_entries.insert(r.id.clone(), r);
            }
            EntityPayload::PomodoroSession(r) => {
                self.pomodoro_sessions.insert(r.id.clone(), r);
            }
        }
    }

    /// Returns a task.
    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    /// Removes a task.
    pub fn remove_task(&mut self, id: &str) -> Option<TaskRecord> {
        self.tasks.remove(id)
    }

    /// Returns a time block.
    pub fn time_block(&self, id: &str) -> Option<&TimeBlockRecord> {
        self.time_blocks.get(id)
    }

    /// Returns a habit entry.
    pub fn habit_entry(&self, id: &str) -> Option<&HabitEntryRecord> {
        self.habit_entries.get(id)
    }

    /// Returns a focus session.
    pub fn pomodoro_session(&self, id: &str) -> Option<&PomodoroSessionRecord> {
        self.pomodoro_sessions.get(id)
    }

    /// Time blocks scheduled for `task_id`, sorted by ID.
    pub fn blocks_for_task(&self, task_id: &str) -> Vec<&TimeBlockRecord> {
        let mut blocks: Vec<_> = self
            .time_blocks
            .values()
            .filter(|b| b.task_id.as_deref() == Some(task_id))
            .collect();
        blocks.sort_by(|a, b| a.id.cmp(&b.id));
        blocks
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.tasks.len()
            + self.time_blocks.len()
            + self.habit_entries.len()
            + self.pomodoro_sessions.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_by_id() {
        let mut cache = EntityCache::new();
        cache.put(EntityPayload::Task(TaskRecord::with_id("t1")));
        cache.put(EntityPayload::Task(TaskRecord {
            title: Some("second".into()),
            ..TaskRecord::with_id("t1")
        }));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.task("t1").and_then(|t| t.title.as_deref()), Some("second"));
        assert!(cache.remove_task("t1").is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn blocks_by_task() {
        let mut cache = EntityCache::new();
        for (id, task) in [("b2", Some("t1")), ("b1", Some("t1")), ("b3", None)] {
            cache.put(EntityPayload::TimeBlock(TimeBlockRecord {
                task_id: task.map(Into::into),
                ..TimeBlockRecord::with_id(id)
            }));
        }

        let ids: Vec<&str> = cache
            .blocks_for_task("t1")
            .into_iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b1", "b2"]);
    }
}
