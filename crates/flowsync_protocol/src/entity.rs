//! Typed entity payloads.
//!
//! Every record field except `id` is optional. A record therefore doubles as
//! a patch: an update operation only carries the fields it changes, and a
//! shallow merge is "take the field from the overlay if it is set, otherwise
//! keep the base value".

use crate::module::Module;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity an operation or update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A to-do item.
    Task,
    /// A scheduled block of calendar time.
    TimeBlock,
    /// A single check-in for a habit.
    HabitEntry,
    /// A focus session started for a task.
    PomodoroSession,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [EntityType; 4] = [
        EntityType::Task,
        EntityType::TimeBlock,
        EntityType::HabitEntry,
        EntityType::PomodoroSession,
    ];

    /// Returns the wire name of this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::TimeBlock => "time_block",
            EntityType::HabitEntry => "habit_entry",
            EntityType::PomodoroSession => "pomodoro_session",
        }
    }

    /// Returns the module that owns entities of this type.
    pub fn owner_module(&self) -> Module {
        match self {
            EntityType::Task => Module::Tasks,
            EntityType::TimeBlock => Module::TimeBlocks,
            EntityType::HabitEntry => Module::Habits,
            EntityType::PomodoroSession => Module::Pomodoro,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Task ID.
    pub id: String,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// Priority (lower is more urgent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated effort in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    /// IDs of time blocks scheduled for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_time_blocks: Option<Vec<String>>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Creates an empty record carrying only the ID.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns true if the task is marked completed.
    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }

    /// Overlays the fields set on `self` onto `base`.
    pub fn merged_over(&self, base: &TaskRecord) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            title: self.title.clone().or_else(|| base.title.clone()),
            description: self.description.clone().or_else(|| base.description.clone()),
            completed: self.completed.or(base.completed),
            priority: self.priority.or(base.priority),
            due_date: self.due_date.or(base.due_date),
            estimated_minutes: self.estimated_minutes.or(base.estimated_minutes),
            linked_time_blocks: self
                .linked_time_blocks
                .clone()
                .or_else(|| base.linked_time_blocks.clone()),
            created_at: self.created_at.or(base.created_at),
            updated_at: self.updated_at.or(base.updated_at),
        }
    }
}

/// A time block record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlockRecord {
    /// Time block ID.
    pub id: String,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Task this block is scheduled for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Planned start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Planned end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// When work on the block actually started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,
    /// When work on the block actually ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimeBlockRecord {
    /// Creates an empty record carrying only the ID.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns true if the block is marked completed.
    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }

    /// Minutes actually spent, rounded to the nearest minute.
    ///
    /// Returns `None` unless both actual start and end are set.
    pub fn minutes_spent(&self) -> Option<i64> {
        let start = self.actual_start_time?;
        let end = self.actual_end_time?;
        let millis = (end - start).num_milliseconds();
        Some((millis as f64 / 60_000.0).round() as i64)
    }

    /// Overlays the fields set on `self` onto `base`.
    pub fn merged_over(&self, base: &TimeBlockRecord) -> TimeBlockRecord {
        TimeBlockRecord {
            id: self.id.clone(),
            title: self.title.clone().or_else(|| base.title.clone()),
            task_id: self.task_id.clone().or_else(|| base.task_id.clone()),
            start_time: self.start_time.or(base.start_time),
            end_time: self.end_time.or(base.end_time),
            actual_start_time: self.actual_start_time.or(base.actual_start_time),
            actual_end_time: self.actual_end_time.or(base.actual_end_time),
            completed: self.completed.or(base.completed),
            created_at: self.created_at.or(base.created_at),
            updated_at: self.updated_at.or(base.updated_at),
        }
    }
}

/// A habit check-in record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitEntryRecord {
    /// Entry ID.
    pub id: String,
    /// Habit this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habit_id: Option<String>,
    /// Day the entry counts for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Whether the habit was done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// Measured value for quantitative habits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl HabitEntryRecord {
    /// Overlays the fields set on `self` onto `base`.
    pub fn merged_over(&self, base: &HabitEntryRecord) -> HabitEntryRecord {
        HabitEntryRecord {
            id: self.id.clone(),
            habit_id: self.habit_id.clone().or_else(|| base.habit_id.clone()),
            date: self.date.or(base.date),
            completed: self.completed.or(base.completed),
            value: self.value.or(base.value),
            note: self.note.clone().or_else(|| base.note.clone()),
            created_at: self.created_at.or(base.created_at),
        }
    }
}

/// A focus session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSessionRecord {
    /// Session ID.
    pub id: String,
    /// Task the session is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Planned length in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl PomodoroSessionRecord {
    /// Overlays the fields set on `self` onto `base`.
    pub fn merged_over(&self, base: &PomodoroSessionRecord) -> PomodoroSessionRecord {
        PomodoroSessionRecord {
            id: self.id.clone(),
            task_id: self.task_id.clone().or_else(|| base.task_id.clone()),
            duration_minutes: self.duration_minutes.or(base.duration_minutes),
            started_at: self.started_at.or(base.started_at),
        }
    }
}

/// An entity payload, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", rename_all = "snake_case")]
pub enum EntityPayload {
    /// Task payload.
    Task(TaskRecord),
    /// Time block payload.
    TimeBlock(TimeBlockRecord),
    /// Habit entry payload.
    HabitEntry(HabitEntryRecord),
    /// Pomodoro session payload.
    PomodoroSession(PomodoroSessionRecord),
}

impl EntityPayload {
    /// Returns the entity type of this payload.
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityPayload::Task(_) => EntityType::Task,
            EntityPayload::TimeBlock(_) => EntityType::TimeBlock,
            EntityPayload::HabitEntry(_) => EntityType::HabitEntry,
            EntityPayload::PomodoroSession(_) => EntityType::PomodoroSession,
        }
    }

    /// Returns the ID of the entity.
    pub fn id(&self) -> &str {
        match self {
            EntityPayload::Task(r) => &r.id,
            EntityPayload::TimeBlock(r) => &r.id,
            EntityPayload::HabitEntry(r) => &r.id,
            EntityPayload::PomodoroSession(r) => &r.id,
        }
    }

    /// Creates an ID-only payload, used for delete operations.
    pub fn tombstone(entity_type: EntityType, id: impl Into<String>) -> Self {
        let id = id.into();
        match entity_type {
            EntityType::Task => EntityPayload::Task(TaskRecord::with_id(id)),
            EntityType::TimeBlock => EntityPayload::TimeBlock(TimeBlockRecord::with_id(id)),
            EntityType::HabitEntry => EntityPayload::HabitEntry(HabitEntryRecord {
                id,
                ..HabitEntryRecord::default()
            }),
            EntityType::PomodoroSession => {
                EntityPayload::PomodoroSession(PomodoroSessionRecord {
                    id,
                    ..PomodoroSessionRecord::default()
                })
            }
        }
    }

    /// Shallow merge: fields set on `self` overwrite those of `base`.
    ///
    /// Returns `None` if the two payloads are of different entity types.
    pub fn merged_over(&self, base: &EntityPayload) -> Option<EntityPayload> {
        match (self, base) {
            (EntityPayload::Task(a), EntityPayload::Task(b)) => {
                Some(EntityPayload::Task(a.merged_over(b)))
            }
            (EntityPayload::TimeBlock(a), EntityPayload::TimeBlock(b)) => {
                Some(EntityPayload::TimeBlock(a.merged_over(b)))
            }
            (EntityPayload::HabitEntry(a), EntityPayload::HabitEntry(b)) => {
                Some(EntityPayload::HabitEntry(a.merged_over(b)))
            }
            (EntityPayload::PomodoroSession(a), EntityPayload::PomodoroSession(b)) => {
                Some(EntityPayload::PomodoroSession(a.merged_over(b)))
            }
            _ => None,
        }
    }

    /// Returns the task record, if this is a task payload.
    pub fn as_task(&self) -> Option<&TaskRecord> {
        match self {
            EntityPayload::Task(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the time block record, if this is a time block payload.
    pub fn as_time_block(&self) -> Option<&TimeBlockRecord> {
        match self {
            EntityPayload::TimeBlock(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    #[test]
    fn entity_type_names() {
        assert_eq!(EntityType::Task.as_str(), "task");
        assert_eq!(EntityType::TimeBlock.to_string(), "time_block");
        assert_eq!(EntityType::HabitEntry.owner_module(), Module::Habits);
    }

    #[test]
    fn local_fields_overwrite_remote() {
        let local = TaskRecord {
            id: "t1".into(),
            title: Some("local title".into()),
            completed: Some(true),
            ..TaskRecord::default()
        };
        let remote = TaskRecord {
            id: "t1".into(),
            title: Some("remote title".into()),
            description: Some("remote description".into()),
            completed: Some(false),
            ..TaskRecord::default()
        };

        let merged = local.merged_over(&remote);
        assert_eq!(merged.title.as_deref(), Some("local title"));
        assert_eq!(merged.description.as_deref(), Some("remote description"));
        assert_eq!(merged.completed, Some(true));
    }

    #[test]
    fn merge_rejects_mismatched_types() {
        let task = EntityPayload::Task(TaskRecord::with_id("t1"));
        let block = EntityPayload::TimeBlock(TimeBlockRecord::with_id("b1"));
        assert!(task.merged_over(&block).is_none());
    }

    #[test]
    fn minutes_spent_rounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let block = TimeBlockRecord {
            id: "b1".into(),
            actual_start_time: Some(t0),
            actual_end_time: Some(t0 + Duration::seconds(27 * 60 + 20)),
            ..TimeBlockRecord::default()
        };
        assert_eq!(block.minutes_spent(), Some(27));

        let open = TimeBlockRecord {
            actual_end_time: None,
            ..block
        };
        assert_eq!(open.minutes_spent(), None);
    }

    #[test]
    fn payload_is_tagged_by_entity_type() {
        let payload = EntityPayload::Task(TaskRecord {
            id: "t1".into(),
            title: Some("Write report".into()),
            ..TaskRecord::default()
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["entityType"], "task");
        assert_eq!(json["title"], "Write report");
        assert!(json.get("description").is_none());

        let back: EntityPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn tombstone_keeps_type_and_id() {
        let payload = EntityPayload::tombstone(EntityType::HabitEntry, "h1");
        assert_eq!(payload.entity_type(), EntityType::HabitEntry);
        assert_eq!(payload.id(), "h1");
    }

    proptest! {
        #[test]
        fn merge_never_drops_a_set_field(
            local_title in proptest::option::of("[a-z]{1,8}"),
            remote_title in proptest::option::of("[a-z]{1,8}"),
            local_done in proptest::option::of(any::<bool>()),
            remote_done in proptest::option::of(any::<bool>()),
        ) {
            let local = TaskRecord { id: "t".into(), title: local_title.clone(), completed: local_done, ..TaskRecord::default() };
            let remote = TaskRecord { id: "t".into(), title: remote_title.clone(), completed: remote_done, ..TaskRecord::default() };
            let merged = local.merged_over(&remote);

            prop_assert_eq!(merged.title, local_title.or(remote_title));
            prop_assert_eq!(merged.completed, local_done.or(remote_done));
        }
    }
}
