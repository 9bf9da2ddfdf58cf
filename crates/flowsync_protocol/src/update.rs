//! Cross-module update notifications.
//!
//! A `CrossModuleUpdate` tells other parts of the application that an entity
//! changed. Cascades are secondary updates derived from a primary one; they
//! go through [`CrossModuleUpdate::cascade`], which enforces the
//! loop-prevention rules:
//!
//! - updates originating from the sync layer never propagate
//! - a cascade never targets its own source module with the same
//!   `(update_type, entity_type)` pair
//! - the hop count of a cascade chain is bounded by [`MAX_CASCADE_HOPS`]

use crate::entity::{EntityPayload, EntityType};
use crate::module::{Module, Targets};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum number of cascade hops from an originating mutation.
pub const MAX_CASCADE_HOPS: u8 = 4;

/// Kind of change being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Entity created.
    Create,
    /// Entity modified.
    Update,
    /// Entity deleted.
    Delete,
    /// Entity completed.
    Complete,
    /// Entity started (e.g. a focus session).
    Start,
}

/// A side effect requested from another module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CascadeAction {
    /// Complete the time blocks linked to a task.
    CompleteLinkedTimeBlocks {
        /// Completed task.
        #[serde(rename = "taskId")]
        task_id: String,
    },
    /// Recompute energy after a task was completed.
    UpdateEnergyAfterTask {
        /// Completed task.
        #[serde(rename = "taskId")]
        task_id: String,
    },
    /// Log the time spent on a task.
    LogTimeForTask {
        /// Completed task.
        #[serde(rename = "taskId")]
        task_id: String,
    },
    /// Complete the task a finished time block was scheduled for.
    CompleteLinkedTask {
        /// Linked task.
        #[serde(rename = "taskId")]
        task_id: String,
        /// Completed block.
        #[serde(rename = "blockId")]
        block_id: String,
    },
    /// Log the actual duration of a time block.
    LogTimeBlockCompletion {
        /// Block that was worked on.
        #[serde(rename = "blockId")]
        block_id: String,
        /// Task the block was scheduled for, if any.
        #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        /// Minutes spent, rounded.
        #[serde(rename = "timeSpent")]
        time_spent: i64,
    },
    /// A task was deleted; dependents should drop references to it.
    TaskDeleted {
        /// Deleted task.
        #[serde(rename = "taskId")]
        task_id: String,
    },
    /// A time block was scheduled for a task.
    LinkTimeBlock {
        /// Task gaining the block.
        #[serde(rename = "taskId")]
        task_id: String,
        /// New block.
        #[serde(rename = "blockId")]
        block_id: String,
    },
}

impl CascadeAction {
    /// Returns the wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            CascadeAction::CompleteLinkedTimeBlocks { .. } => "complete_linked_time_blocks",
            CascadeAction::UpdateEnergyAfterTask { .. } => "update_energy_after_task",
            CascadeAction::LogTimeForTask { .. } => "log_time_for_task",
            CascadeAction::CompleteLinkedTask { .. } => "complete_linked_task",
            CascadeAction::LogTimeBlockCompletion { .. } => "log_time_block_completion",
            CascadeAction::TaskDeleted { .. } => "task_deleted",
            CascadeAction::LinkTimeBlock { .. } => "link_time_block",
        }
    }
}

/// Body of a cross-module update.
///
/// Serialized without a wrapper: a record carries its `entityType` tag, an
/// action its `action` tag, and a synced notice only an `operationId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateData {
    /// The entity record as written locally.
    Record(EntityPayload),
    /// A side effect for the receiving module.
    Action(CascadeAction),
    /// The backend accepted an operation for this entity.
    Synced {
        /// Synced operation.
        #[serde(rename = "operationId")]
        operation_id: String,
    },
}

impl UpdateData {
    /// Returns the cascade action, if this update carries one.
    pub fn action(&self) -> Option<&CascadeAction> {
        match self {
            UpdateData::Action(action) => Some(action),
            _ => None,
        }
    }
}

/// A broadcast notification that an entity changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossModuleUpdate {
    /// Module that caused the update.
    pub source_module: Module,
    /// Recipients.
    pub target_modules: Targets,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Kind of change.
    pub update_type: UpdateType,
    /// Update body.
    pub data: UpdateData,
    /// Whether receivers may derive further cascades from this update.
    pub propagate: bool,
    /// Number of cascade hops from the originating mutation.
    pub hops: u8,
}

impl CrossModuleUpdate {
    /// Creates a primary update.
    ///
    /// Updates sourced from [`Module::Sync`] never propagate.
    pub fn new(
        source_module: Module,
        target_modules: Targets,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        update_type: UpdateType,
        data: UpdateData,
    ) -> Self {
        Self {
            source_module,
            target_modules,
            entity_type,
            entity_id: entity_id.into(),
            update_type,
            data,
            propagate: source_module != Module::Sync,
            hops: 0,
        }
    }

    /// Derives a cascade targeting `targets` with the given action.
    ///
    /// The cascade keeps the source module, entity and update type of `self`
    /// and is one hop further from the originating mutation. Returns `None`
    /// if `self` does not propagate, the hop bound would be exceeded, or no
    /// target remains after removing the source module.
    pub fn cascade(&self, targets: Targets, action: CascadeAction) -> Option<CrossModuleUpdate> {
        if !self.propagate || self.hops >= MAX_CASCADE_HOPS {
            return None;
        }

        // Same (update_type, entity_type) pair: never route back to the source.
        let mut modules: BTreeSet<Module> = match targets {
            Targets::All => Module::ALL.into_iter().collect(),
            Targets::Modules(set) => set,
        };
        modules.remove(&self.source_module);
        modules.remove(&Module::Sync);
        if modules.is_empty() {
            return None;
        }

        Some(CrossModuleUpdate {
            source_module: self.source_module,
            target_modules: Targets::Modules(modules),
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            update_type: self.update_type,
            data: UpdateData::Action(action),
            propagate: true,
            hops: self.hops + 1,
        })
    }

    /// Returns true if the hop count is within [`MAX_CASCADE_HOPS`].
    pub fn within_hop_bound(&self) -> bool {
        self.hops <= MAX_CASCADE_HOPS
    }
}
