use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueueError;

/// Lifecycle of a queued file.
///
/// Each item flows through: DISCOVERED → STAGED → QUEUED → RUNNING →
/// COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Discovered,
    Staged,
    Queued,
    Running,
    Completed,
    Failed,
}

impl ItemState {
    /// Whether `self → next` is a legal step.
    pub fn can_advance_to(self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (ItemState::Discovered, ItemState::Staged)
                | (ItemState::Staged, ItemState::Queued)
                | (ItemState::Queued, ItemState::Running)
                | (ItemState::Running, ItemState::Completed)
                | (ItemState::Running, ItemState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Discovered => write!(f, "DISCOVERED"),
            ItemState::Staged => write!(f, "STAGED"),
            ItemState::Queued => write!(f, "QUEUED"),
            ItemState::Running => write!(f, "RUNNING"),
            ItemState::Completed => write!(f, "COMPLETED"),
            ItemState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A file moving through the directory queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Name the file had in the inbox.
    pub original_name: String,
    /// Collision-free name in the cache and the outbox; empty until staged.
    pub staged_name: String,
    /// Assigned when the item is submitted to the pool.
    pub sequence_id: Option<u64>,
    pub state: ItemState,
    pub state_history: Vec<ItemState>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn discovered(original_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            original_name: original_name.into(),
            staged_name: String::new(),
            sequence_id: None,
            state: ItemState::Discovered,
            state_history: Vec::new(),
            discovered_at: now,
            updated_at: now,
        }
    }

    /// An item left in the cache by an earlier run. Its staged name doubles
    /// as its original name.
    pub fn recovered(staged_name: impl Into<String>) -> Self {
        let staged_name = staged_name.into();
        let mut item = Self::discovered(staged_name.clone());
        item.staged_name = staged_name;
        item.state_history.push(ItemState::Discovered);
        item.state = ItemState::Staged;
        item
    }

    /// Display name used in logs.
    pub fn name(&self) -> String {
        match self.sequence_id {
            Some(id) => format!("file '{}' (file {id})", self.staged_name),
            None => format!("file '{}'", self.original_name),
        }
    }

    /// Move to `next`, rejecting transitions outside the lifecycle order.
    pub fn advance(&mut self, next: ItemState) -> Result<(), QueueError> {
        if !self.state.can_advance_to(next) {
            return Err(QueueError::InvalidTransition {
                item: self.original_name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state_history.push(self.state);
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_staged(&mut self, staged_name: impl Into<String>) -> Result<(), QueueError> {
        self.advance(ItemState::Staged)?;
        self.staged_name = staged_name.into();
        Ok(())
    }

    pub fn mark_queued(&mut self, sequence_id: u64) -> Result<(), QueueError> {
        self.advance(ItemState::Queued)?;
        self.sequence_id = Some(sequence_id);
        Ok(())
    }
}
