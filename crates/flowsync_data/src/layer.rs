//! The unified data layer.
//!
//! Every write follows the same steps:
//!
//! 1. Build the new local record (fresh ID and timestamps on create)
//! 2. Enqueue the matching operation on the engine without starting a pass
//! 3. Update the local cache
//! 4. Broadcast the primary update, then its cascades
//! 5. Start a sync pass, so a synced notice never precedes the write's own
//!    broadcasts

use crate::cache::EntityCache;
use crate::cascade::{self, Cascade};
use crate::error::{DataError, DataResult};
use chrono::Utc;
use flowsync_engine::{BusEvent, Subscription, SyncEngine, Topic};
use flowsync_protocol::{
    new_id, CascadeAction, CrossModuleUpdate, EntityPayload, EntityType, HabitEntryRecord,
    Module, OperationKind, PomodoroSessionRecord, SyncEvent, Targets, TaskRecord,
    TimeBlockRecord, UpdateData, UpdateType,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Entity-level operations on top of the sync engine.
///
/// Construction fails unless the engine has a handler for every entity type
/// the layer writes.
///
/// # Example
///
/// ```rust,ignore
/// let layer = UnifiedDataLayer::new(engine)?;
/// let task = layer.create_task(TaskRecord {
///     title: Some("Write report".into()),
///     ..TaskRecord::default()
/// })?;
/// layer.update_task(&task.id, TaskRecord {
///     completed: Some(true),
///     ..TaskRecord::default()
/// })?;
/// ```
pub struct UnifiedDataLayer {
    engine: Arc<SyncEngine>,
    cache: RwLock<EntityCache>,
    synced: Option<Subscription>,
}

impl std::fmt::Debug for UnifiedDataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedDataLayer")
            .field("engine", &self.engine)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl UnifiedDataLayer {
    /// Creates a data layer writing through `engine`.
    ///
    /// # Errors
    ///
    /// Returns `Engine(MissingHandlers)` if the engine lacks a handler for
    /// any entity type.
    pub fn new(engine: Arc<SyncEngine>) -> DataResult<Self> {
        engine.handlers().require(&EntityType::ALL)?;

        let weak = Arc::downgrade(&engine);
        let synced = engine.subscribe(
            Topic::OperationSynced,
            Arc::new(move |event: &BusEvent| {
                let (Some(engine), Some(event)) = (weak.upgrade(), event.as_sync()) else {
                    return;
                };
                if let Some(update) = synced_notice(event) {
                    engine.bus().broadcast(update);
                }
            }),
        );

        Ok(Self {
            engine,
            cache: RwLock::new(EntityCache::new()),
            synced: Some(synced),
        })
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Subscribes to cross-module updates addressed to `module`.
    pub fn subscribe_module(
        &self,
        module: Module,
        listener: impl Fn(&CrossModuleUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.engine.bus().subscribe_module(module, listener)
    }

    /// Puts a record obtained elsewhere (e.g. loaded from the backend) into
    /// the cache without queueing anything.
    pub fn hydrate(&self, payload: EntityPayload) {
        self.cache.write().put(payload);
    }

    /// Returns the cached task.
    pub fn task(&self, id: &str) -> Option<TaskRecord> {
        self.cache.read().task(id).cloned()
    }

    /// Returns the cached time block.
    pub fn time_block(&self, id: &str) -> Option<TimeBlockRecord> {
        self.cache.read().time_block(id).cloned()
    }

    /// Returns the cached habit entry.
    pub fn habit_entry(&self, id: &str) -> Option<HabitEntryRecord> {
        self.cache.read().habit_entry(id).cloned()
    }

    /// Returns the cached focus session.
    pub fn pomodoro_session(&self, id: &str) -> Option<PomodoroSessionRecord> {
        self.cache.read().pomodoro_session(id).cloned()
    }

    /// Returns the cached time blocks scheduled for a task.
    pub fn blocks_for_task(&self, task_id: &str) -> Vec<TimeBlockRecord> {
        self.cache
            .read()
            .blocks_for_task(task_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Creates a task.
    pub fn create_task(&self, draft: TaskRecord) -> DataResult<TaskRecord> {
        let now = Utc::now();
        let mut task = draft;
        task.id = new_id();
        task.completed.get_or_insert(false);
        task.linked_time_blocks.get_or_insert_with(Vec::new);
        task.created_at = Some(now);
        task.updated_at = Some(now);

        let payload = EntityPayload::Task(task.clone());
        self.engine.enqueue_deferred(
            OperationKind::Create,
            EntityType::Task,
            &task.id,
            payload.clone(),
        )?;
        self.cache.write().put(payload.clone());
        debug!(task_id = %task.id, "task created");

        self.publish(
            self.primary(Module::Tasks, &task.id, UpdateType::Create, payload),
            Vec::new(),
        );
        Ok(task)
    }

    /// Applies `patch` to a cached task. Fields left `None` are unchanged.
    ///
    /// Completing a task that was not completed cascades to the time block,
    /// energy and time tracking modules.
    pub fn update_task(&self, id: &str, patch: TaskRecord) -> DataResult<TaskRecord> {
        let before = self
            .task(id)
            .ok_or_else(|| DataError::not_found(EntityType::Task, id))?;

        let mut patch = patch;
        patch.id = id.to_string();
        patch.updated_at = Some(Utc::now());
        let merged = patch.merged_over(&before);

        let completed = cascade::completes(before.is_completed(), patch.completed);
        let cascades = cascade::task_updated(&before, &patch);

        self.engine.enqueue_deferred(
            OperationKind::Update,
            EntityType::Task,
            id,
            EntityPayload::Task(patch),
        )?;
        self.cache.write().put(EntityPayload::Task(merged.clone()));
        debug!(task_id = %id, completed, "task updated");

        let update_type = if completed {
            UpdateType::Complete
        } else {
            UpdateType::Update
        };
        self.publish(
            self.primary(
                Module::Tasks,
                id,
                update_type,
                EntityPayload::Task(merged.clone()),
            ),
            cascades,
        );
        Ok(merged)
    }

    /// Deletes a task and tells dependent modules to detach from it.
    pub fn delete_task(&self, id: &str) -> DataResult<()> {
        self.engine.enqueue_deferred(
            OperationKind::Delete,
            EntityType::Task,
            id,
            EntityPayload::tombstone(EntityType::Task, id),
        )?;
        self.cache.write().remove_task(id);
        debug!(task_id = %id, "task deleted");

        let notice = CrossModuleUpdate::new(
            Module::Tasks,
            Targets::modules(cascade::TASK_DELETED_TARGETS),
            EntityType::Task,
            id,
            UpdateType::Delete,
            UpdateData::Action(CascadeAction::TaskDeleted {
                task_id: id.to_string(),
            }),
        );
        self.publish(notice, Vec::new());
        Ok(())
    }

    /// Creates a time block. A block created for a cached task is appended
    /// to the task's linked blocks.
    ///
    /// A task that is not cached (e.g. never hydrated on this device) has no
    /// local record to append to. The block is still created and the tasks
    /// module is still told about the link.
    pub fn create_time_block(&self, draft: TimeBlockRecord) -> DataResult<TimeBlockRecord> {
        let task_before = draft.task_id.as_deref().and_then(|task_id| self.task(task_id));

        let now = Utc::now();
        let mut block = draft;
        block.id = new_id();
        block.completed.get_or_insert(false);
        block.created_at = Some(now);
        block.updated_at = Some(now);

        let payload = EntityPayload::TimeBlock(block.clone());
        self.engine.enqueue_deferred(
            OperationKind::Create,
            EntityType::TimeBlock,
            &block.id,
            payload.clone(),
        )?;
        self.cache.write().put(payload.clone());

        match &task_before {
            Some(task) => self.append_linked_block(task, &block.id)?,
            None if block.task_id.is_some() => {
                debug!(task_id = ?block.task_id, "linked task not cached, skipping local append");
            }
            None => {}
        }
        debug!(block_id = %block.id, task_id = ?block.task_id, "time block created");

        self.publish(
            self.primary(Module::TimeBlocks, &block.id, UpdateType::Create, payload),
            cascade::time_block_created(&block),
        );
        Ok(block)
    }

    /// Applies `patch` to a cached time block. Fields left `None` are
    /// unchanged.
    ///
    /// Completing a block linked to a task cascades to the tasks module.
    /// Setting actual start or end times, once both are known, logs the time
    /// spent with the time tracking module.
    pub fn update_time_block(
        &self,
        id: &str,
        patch: TimeBlockRecord,
    ) -> DataResult<TimeBlockRecord> {
        let before = self
            .time_block(id)
            .ok_or_else(|| DataError::not_found(EntityType::TimeBlock, id))?;

        let mut patch = patch;
        patch.id = id.to_string();
        patch.updated_at = Some(Utc::now());
        let merged = patch.merged_over(&before);

        let completed = cascade::completes(before.is_completed(), patch.completed);
        let cascades = cascade::time_block_updated(&before, &patch, &merged);

        self.engine.enqueue_deferred(
            OperationKind::Update,
            EntityType::TimeBlock,
            id,
            EntityPayload::TimeBlock(patch),
        )?;
        self.cache
            .write()
            .put(EntityPayload::TimeBlock(merged.clone()));
        debug!(block_id = %id, completed, "time block updated");

        let update_type = if completed {
            UpdateType::Complete
        } else {
            UpdateType::Update
        };
        self.publish(
            self.primary(
                Module::TimeBlocks,
                id,
                update_type,
                EntityPayload::TimeBlock(merged.clone()),
            ),
            cascades,
        );
        Ok(merged)
    }

    /// Records a habit check-in. The date defaults to today (UTC).
    pub fn create_habit_entry(&self, draft: HabitEntryRecord) -> DataResult<HabitEntryRecord> {
        let now = Utc::now();
        let mut entry = draft;
        entry.id = new_id();
        entry.date.get_or_insert(now.date_naive());
        entry.created_at = Some(now);

        let payload = EntityPayload::HabitEntry(entry.clone());
        self.engine.enqueue_deferred(
            OperationKind::Create,
            EntityType::HabitEntry,
            &entry.id,
            payload.clone(),
        )?;
        self.cache.write().put(payload.clone());
        debug!(entry_id = %entry.id, habit_id = ?entry.habit_id, "habit entry created");

        self.publish(
            self.primary(Module::Habits, &entry.id, UpdateType::Create, payload),
            Vec::new(),
        );
        Ok(entry)
    }

    /// Schedules an existing time block for an existing task.
    ///
    /// Both sides are updated: the block's `task_id` and the task's linked
    /// blocks.
    pub fn link_task_to_time_block(&self, task_id: &str, block_id: &str) -> DataResult<()> {
        let task = self
            .task(task_id)
            .ok_or_else(|| DataError::not_found(EntityType::Task, task_id))?;
        let block_before = self
            .time_block(block_id)
            .ok_or_else(|| DataError::not_found(EntityType::TimeBlock, block_id))?;

        let block_patch = TimeBlockRecord {
            task_id: Some(task_id.to_string()),
            updated_at: Some(Utc::now()),
            ..TimeBlockRecord::with_id(block_id)
        };
        let block = block_patch.merged_over(&block_before);

        self.engine.enqueue_deferred(
            OperationKind::Update,
            EntityType::TimeBlock,
            block_id,
            EntityPayload::TimeBlock(block_patch),
        )?;
        self.cache.write().put(EntityPayload::TimeBlock(block.clone()));
        self.append_linked_block(&task, block_id)?;
        debug!(%task_id, %block_id, "time block linked to task");

        self.publish(
            self.primary(
                Module::TimeBlocks,
                block_id,
                UpdateType::Update,
                EntityPayload::TimeBlock(block),
            ),
            vec![cascade::time_block_linked(task_id, block_id)],
        );
        Ok(())
    }

    /// Starts a focus session for a cached task.
    pub fn start_pomodoro_for_task(
        &self,
        task_id: &str,
        duration_minutes: u32,
    ) -> DataResult<PomodoroSessionRecord> {
        if self.task(task_id).is_none() {
            return Err(DataError::not_found(EntityType::Task, task_id));
        }

        let session = PomodoroSessionRecord {
            id: new_id(),
            task_id: Some(task_id.to_string()),
            duration_minutes: Some(duration_minutes),
            started_at: Some(Utc::now()),
        };

        let payload = EntityPayload::PomodoroSession(session.clone());
        self.engine.enqueue_deferred(
            OperationKind::Create,
            EntityType::PomodoroSession,
            &session.id,
            payload.clone(),
        )?;
        self.cache.write().put(payload.clone());
        debug!(session_id = %session.id, %task_id, duration_minutes, "focus session started");

        self.publish(
            self.primary(Module::Pomodoro, &session.id, UpdateType::Start, payload),
            Vec::new(),
        );
        Ok(session)
    }

    /// Appends `block_id` to the task's linked blocks and queues the change.
    fn append_linked_block(&self, task: &TaskRecord, block_id: &str) -> DataResult<()> {
        let mut linked = task.linked_time_blocks.clone().unwrap_or_default();
        if linked.iter().any(|id| id == block_id) {
            return Ok(());
        }
        linked.push(block_id.to_string());

        let patch = TaskRecord {
            linked_time_blocks: Some(linked),
            updated_at: Some(Utc::now()),
            ..TaskRecord::with_id(task.id.clone())
        };
        let merged = patch.merged_over(task);

        self.engine.enqueue_deferred(
            OperationKind::Update,
            EntityType::Task,
            &task.id,
            EntityPayload::Task(patch),
        )?;
        self.cache.write().put(EntityPayload::Task(merged));
        Ok(())
    }

    fn primary(
        &self,
        source: Module,
        entity_id: &str,
        update_type: UpdateType,
        record: EntityPayload,
    ) -> CrossModuleUpdate {
        let entity_type = record.entity_type();
        CrossModuleUpdate::new(
            source,
            cascade::primary_targets(entity_type),
            entity_type,
            entity_id,
            update_type,
            UpdateData::Record(record),
        )
    }

    /// Broadcasts `primary`, then every cascade derived from it, then starts
    /// a pass for the operations the write queued.
    fn publish(&self, primary: CrossModuleUpdate, cascades: Vec<Cascade>) {
        let derived: Vec<CrossModuleUpdate> = cascades
            .into_iter()
            .filter_map(|c| primary.cascade(c.targets(), c.action))
            .collect();

        let bus = self.engine.bus();
        bus.broadcast(primary);
        for update in derived {
            if let Some(action) = update.data.action() {
                debug!(action = action.name(), entity_id = %update.entity_id, "cascade");
            }
            bus.broadcast(update);
        }
        self.engine.spawn_sync();
    }
}

impl Drop for UnifiedDataLayer {
    fn drop(&mut self) {
        if let Some(subscription) = self.synced.take() {
            subscription.unsubscribe();
        }
    }
}

/// Builds the sync-sourced notice for an accepted operation.
fn synced_notice(event: &SyncEvent) -> Option<CrossModuleUpdate> {
    let entity_type = event.entity?;
    let entity_id = event.entity_id.clone()?;
    let operation_id = event.operation_id.clone()?;
    Some(CrossModuleUpdate::new(
        Module::Sync,
        Targets::only(entity_type.owner_module()),
        entity_type,
        entity_id,
        UpdateType::Update,
        UpdateData::Synced { operation_id },
    ))
}
