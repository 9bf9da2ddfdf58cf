//! The cascade-rule table.
//!
//! Pure functions mapping an entity change to the modules that must hear
//! about it. The data layer turns their output into bus broadcasts.
//!
//! | Trigger | Targets | Action |
//! |---|---|---|
//! | task completed | time_blocks, energy, time_tracking | `complete_linked_time_blocks`, `update_energy_after_task`, `log_time_for_task` |
//! | time block completed with a task | tasks | `complete_linked_task` |
//! | time block actual start and end known | time_tracking | `log_time_block_completion` |
//! | task deleted | calendar, dashboard, time_blocks, habits | `task_deleted` |
//! | time block created for a task | tasks | `link_time_block` |

use flowsync_protocol::{CascadeAction, EntityType, Module, Targets, TaskRecord, TimeBlockRecord};

/// Modules notified of every task or time block write.
pub const PLANNING_TARGETS: [Module; 2] = [Module::Calendar, Module::Dashboard];

/// Modules notified of habit entries.
pub const HABIT_TARGETS: [Module; 3] = [Module::Habits, Module::Dashboard, Module::Energy];

/// Modules notified when a focus session starts.
pub const POMODORO_TARGETS: [Module; 3] =
    [Module::TimeTracking, Module::Dashboard, Module::TimeBlocks];

/// Modules notified when a task is deleted.
pub const TASK_DELETED_TARGETS: [Module; 4] = [
    Module::Calendar,
    Module::Dashboard,
    Module::TimeBlocks,
    Module::Habits,
];

/// A single-target cascade derived from a primary update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cascade {
    /// Receiving module.
    pub target: Module,
    /// Requested side effect.
    pub action: CascadeAction,
}

impl Cascade {
    fn new(target: Module, action: CascadeAction) -> Self {
        Self { target, action }
    }

    /// Returns the cascade's target set.
    pub fn targets(&self) -> Targets {
        Targets::only(self.target)
    }
}

/// Primary broadcast targets for writes to `entity_type`.
pub fn primary_targets(entity_type: EntityType) -> Targets {
    match entity_type {
        EntityType::Task | EntityType::TimeBlock => Targets::modules(PLANNING_TARGETS),
        EntityType::HabitEntry => Targets::modules(HABIT_TARGETS),
        EntityType::PomodoroSession => Targets::modules(POMODORO_TARGETS),
    }
}

/// Returns true if `patch` completes a record that was not completed.
pub fn completes(was_completed: bool, patch_completed: Option<bool>) -> bool {
    !was_completed && patch_completed == Some(true)
}

/// Cascades for a task update.
pub fn task_updated(before: &TaskRecord, patch: &TaskRecord) -> Vec<Cascade> {
    if !completes(before.is_completed(), patch.completed) {
        return Vec::new();
    }
    let task_id = before.id.clone();
    vec![
        Cascade::new(
            Module::TimeBlocks,
            CascadeAction::CompleteLinkedTimeBlocks {
                task_id: task_id.clone(),
            },
        ),
        Cascade::new(
            Module::Energy,
            CascadeAction::UpdateEnergyAfterTask {
                task_id: task_id.clone(),
            },
        ),
        Cascade::new(Module::TimeTracking, CascadeAction::LogTimeForTask { task_id }),
    ]
}

/// Cascades for a time block update.
///
/// `merged` is the block after applying `patch` to `before`. The time log
/// fires when the patch touches an actual time and both are then known.
pub fn time_block_updated(
    before: &TimeBlockRecord,
    patch: &TimeBlockRecord,
    merged: &TimeBlockRecord,
) -> Vec<Cascade> {
    let mut cascades = Vec::new();

    if completes(before.is_completed(), patch.completed) {
        if let Some(task_id) = &merged.task_id {
            cascades.push(Cascade::new(
                Module::Tasks,
                CascadeAction::CompleteLinkedTask {
                    task_id: task_id.clone(),
                    block_id: merged.id.clone(),
                },
            ));
        }
    }

    let touches_actuals = patch.actual_start_time.is_some() || patch.actual_end_time.is_some();
    if touches_actuals {
        if let Some(time_spent) = merged.minutes_spent() {
            cascades.push(Cascade::new(
                Module::TimeTracking,
                CascadeAction::LogTimeBlockCompletion {
                    block_id: merged.id.clone(),
                    task_id: merged.task_id.clone(),
                    time_spent,
                },
            ));
        }
    }

    cascades
}

/// Cascades for a newly created time block.
pub fn time_block_created(block: &TimeBlockRecord) -> Vec<Cascade> {
    block
        .task_id
        .iter()
        .map(|task_id| time_block_linked(task_id, &block.id))
        .collect()
}

/// Cascade telling the tasks module that a block was scheduled for a task.
pub fn time_block_linked(task_id: &str, block_id: &str) -> Cascade {
    Cascade::new(
        Module::Tasks,
        CascadeAction::LinkTimeBlock {
            task_id: task_id.to_string(),
            block_id: block_id.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn block(id: &str, task_id: Option<&str>) -> TimeBlockRecord {
        TimeBlockRecord {
            id: id.into(),
            task_id: task_id.map(Into::into),
            completed: Some(false),
            ..TimeBlockRecord::default()
        }
    }

    #[test]
    fn task_completion_fans_out_to_three_modules() {
        let before = TaskRecord {
            completed: Some(false),
            ..TaskRecord::with_id("t1")
        };
        let patch = TaskRecord {
            completed: Some(true),
            ..TaskRecord::with_id("t1")
        };

        let cascades = task_updated(&before, &patch);
        let targets: Vec<Module> = cascades.iter().map(|c| c.target).collect();
        assert_eq!(
            targets,
            vec![Module::TimeBlocks, Module::Energy, Module::TimeTracking]
        );
        assert_eq!(
            cascades[0].action,
            CascadeAction::CompleteLinkedTimeBlocks {
                task_id: "t1".into()
            }
        );
    }

    #[test]
    fn already_completed_task_does_not_cascade() {
        let before = TaskRecord {
            completed: Some(true),
            ..TaskRecord::with_id("t1")
        };
        let patch = TaskRecord {
            completed: Some(true),
            title: Some("renamed".into()),
            ..TaskRecord::with_id("t1")
        };
        assert!(task_updated(&before, &patch).is_empty());
        assert!(task_updated(&TaskRecord::with_id("t1"), &TaskRecord::with_id("t1")).is_empty());
    }

    #[test]
    fn block_completion_targets_linked_task() {
        let before = block("b1", Some("t1"));
        let patch = TimeBlockRecord {
            completed: Some(true),
            ..TimeBlockRecord::with_id("b1")
        };
        let merged = patch.merged_over(&before);

        assert_eq!(
            time_block_updated(&before, &patch, &merged),
            vec![Cascade::new(
                Module::Tasks,
                CascadeAction::CompleteLinkedTask {
                    task_id: "t1".into(),
                    block_id: "b1".into()
                }
            )]
        );

        let unlinked = block("b2", None);
        let merged = patch.merged_over(&unlinked);
        assert!(time_block_updated(&unlinked, &patch, &merged).is_empty());
    }

    #[test]
    fn time_log_rounds_to_minutes() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let before = block("b1", None);
        let patch = TimeBlockRecord {
            actual_start_time: Some(t0),
            actual_end_time: Some(t0 + Duration::seconds(27 * 60 + 20)),
            ..TimeBlockRecord::with_id("b1")
        };
        let merged = patch.merged_over(&before);

        let cascades = time_block_updated(&before, &patch, &merged);
        assert_eq!(cascades.len(), 1);
        assert_eq!(cascades[0].target, Module::TimeTracking);
        assert!(matches!(
            cascades[0].action,
            CascadeAction::LogTimeBlockCompletion { time_spent: 27, .. }
        ));
    }

    #[test]
    fn time_log_needs_both_actuals() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let before = block("b1", None);
        let patch = TimeBlockRecord {
            actual_start_time: Some(t0),
            ..TimeBlockRecord::with_id("b1")
        };
        let merged = patch.merged_over(&before);
        assert!(time_block_updated(&before, &patch, &merged).is_empty());

        // Unrelated edits of a block with known actuals do not re-log.
        let logged = TimeBlockRecord {
            actual_start_time: Some(t0),
            actual_end_time: Some(t0 + Duration::minutes(5)),
            ..block("b1", None)
        };
        let rename = TimeBlockRecord {
            title: Some("renamed".into()),
            ..TimeBlockRecord::with_id("b1")
        };
        let merged = rename.merged_over(&logged);
        assert!(time_block_updated(&logged, &rename, &merged).is_empty());
    }

    #[test]
    fn created_block_links_task() {
        assert_eq!(time_block_created(&block("b1", None)), Vec::new());
        assert_eq!(
            time_block_created(&block("b1", Some("t1"))),
            vec![Cascade::new(
                Module::Tasks,
                CascadeAction::LinkTimeBlock {
                    task_id: "t1".into(),
                    block_id: "b1".into()
                }
            )]
        );
    }

    #[test]
    fn primary_target_table() {
        assert_eq!(
            primary_targets(EntityType::Task),
            Targets::modules([Module::Calendar, Module::Dashboard])
        );
        assert!(primary_targets(EntityType::HabitEntry).includes(Module::Energy));
        assert!(primary_targets(EntityType::PomodoroSession).includes(Module::TimeBlocks));
        assert!(!primary_targets(EntityType::PomodoroSession).includes(Module::Tasks));
    }
}
