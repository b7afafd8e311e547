//! Undo/redo history
//!
//! Commands are recorded after the change they describe has already been
//! applied. They are staged in a pending group and pushed onto the history
//! by [`UndoCoordinator::commit`]; the position splits the history into an
//! applied prefix and an undone suffix.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::defaults::DEFAULT_MAX_UNDO_GROUPS;
use crate::config::UndoConfig;
use crate::events::{EventSink, NoOpEventSink};
use crate::ipc::Address;

/// Channel announcing history changes
pub const UNDO_CHANGED: &str = "undo:changed";

/// Errors raised by the undo history
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    #[error("Command '{type_tag}' failed: {reason}")]
    CommandFailed { type_tag: String, reason: String },
}

/// A reversible change
pub trait Command: Send + Sync {
    fn type_tag(&self) -> &str;

    /// Payload the command was created from
    fn info(&self) -> &Value;

    fn undo(&mut self) -> Result<(), String>;

    fn redo(&mut self) -> Result<(), String>;

    /// Whether this change makes the document differ from its saved state
    fn dirty(&self) -> bool {
        true
    }
}

/// Builds a command of one type from its payload
pub type CommandFactory = Box<dyn Fn(Value) -> Box<dyn Command> + Send + Sync>;

/// Commands undone and redone as a unit
pub struct UndoGroup {
    commands: Vec<Box<dyn Command>>,
    timestamp: DateTime<Utc>,
    description: Option<String>,
}

impl UndoGroup {
    fn new(commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            commands,
            timestamp: Utc::now(),
            description: None,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn dirty(&self) -> bool {
        self.commands.iter().any(|c| c.dirty())
    }

    fn undo(&mut self) -> Result<(), UndoError> {
        for command in self.commands.iter_mut().rev() {
            command.undo().map_err(|reason| UndoError::CommandFailed {
                type_tag: command.type_tag().to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    fn redo(&mut self) -> Result<(), UndoError> {
        for command in self.commands.iter_mut() {
            command.redo().map_err(|reason| UndoError::CommandFailed {
                type_tag: command.type_tag().to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Per-process undo history
pub struct UndoCoordinator {
    sink: Arc<dyn EventSink>,
    factories: HashMap<String, CommandFactory>,
    groups: Vec<UndoGroup>,
    pending: Vec<Box<dyn Command>>,
    position: usize,
    /// Position at the last save; `None` once that state is unreachable
    saved_at: Option<usize>,
    max_groups: usize,
}

impl UndoCoordinator {
    pub fn new(sink: Arc<dyn EventSink>, config: &UndoConfig) -> Self {
        Self {
            sink,
            factories: HashMap::new(),
            groups: Vec::new(),
            pending: Vec::new(),
            position: 0,
            saved_at: Some(0),
            max_groups: config.max_groups.max(1),
        }
    }

    /// History that publishes nothing
    pub fn local() -> Self {
        Self::new(
            Arc::new(NoOpEventSink),
            &UndoConfig {
                max_groups: DEFAULT_MAX_UNDO_GROUPS,
            },
        )
    }

    pub fn register<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Fn(Value) -> Box<dyn Command> + Send + Sync + 'static,
    {
        self.factories.insert(type_tag.to_string(), Box::new(factory));
        debug!("Registered undo command '{}'", type_tag);
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Record a change in the pending group
    pub fn add(&mut self, type_tag: &str, info: Value) -> Result<(), UndoError> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| UndoError::UnknownCommand(type_tag.to_string()))?;
        self.pending.push(factory(info));
        Ok(())
    }

    /// Push the pending group, discarding anything that was undone
    pub async fn commit(&mut self) -> bool {
        if !self.commit_pending(None) {
            return false;
        }
        self.notify().await;
        true
    }

    /// Commit with a label shown in history views
    pub async fn commit_with_description(&mut self, description: &str) -> bool {
        if !self.commit_pending(Some(description.to_string())) {
            return false;
        }
        self.notify().await;
        true
    }

    fn commit_pending(&mut self, description: Option<String>) -> bool {
        if self.pending.is_empty() {
            return false;
        }

        self.groups.truncate(self.position);
        if self.saved_at.map_or(false, |s| s > self.position) {
            self.saved_at = None;
        }

        let mut group = UndoGroup::new(std::mem::take(&mut self.pending));
        group.description = description;
        self.groups.push(group);
        self.position += 1;

        if self.groups.len() > self.max_groups {
            self.groups.remove(0);
            self.position -= 1;
            self.saved_at = self.saved_at.and_then(|s| s.checked_sub(1));
        }
        true
    }

    /// Revert and drop the pending group
    pub async fn cancel(&mut self) -> Result<(), UndoError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut group = UndoGroup::new(std::mem::take(&mut self.pending));
        group.undo()?;
        self.notify().await;
        Ok(())
    }

    /// Undo the group before the position; pending commands are committed first
    pub async fn undo(&mut self) -> Result<bool, UndoError> {
        self.commit_pending(None);
        if self.position == 0 {
            return Ok(false);
        }

        self.groups[self.position - 1].undo()?;
        self.position -= 1;
        self.notify().await;
        Ok(true)
    }

    /// Redo the group at the position
    ///
    /// A pending edit is committed first, which discards the redo tail.
    pub async fn redo(&mut self) -> Result<bool, UndoError> {
        if self.commit_pending(None) {
            self.notify().await;
        }
        if self.position >= self.groups.len() {
            return Ok(false);
        }

        self.groups[self.position].redo()?;
        self.position += 1;
        self.notify().await;
        Ok(true)
    }

    /// Mark the current position as the saved state
    pub async fn save(&mut self) {
        self.commit_pending(None);
        self.saved_at = Some(self.position);
        self.notify().await;
    }

    pub fn dirty(&self) -> bool {
        if self.pending.iter().any(|c| c.dirty()) {
            return true;
        }
        match self.saved_at {
            Some(saved) => {
                let (from, to) = if saved <= self.position {
                    (saved, self.position)
                } else {
                    (self.position, saved)
                };
                self.groups[from..to].iter().any(UndoGroup::dirty)
            }
            None => true,
        }
    }

    /// Merge groups `index..position` into one, dropping the redo tail
    pub async fn collapse_to(&mut self, index: usize) -> bool {
        self.commit_pending(None);
        if index + 1 >= self.position {
            return false;
        }

        self.groups.truncate(self.position);
        let merged: Vec<Box<dyn Command>> = self
            .groups
            .drain(index..)
            .flat_map(|group| group.commands)
            .collect();
        let old_position = self.position;
        self.groups.push(UndoGroup::new(merged));
        self.position = index + 1;

        self.saved_at = match self.saved_at {
            Some(s) if s <= index => Some(s),
            Some(s) if s == old_position => Some(self.position),
            _ => None,
        };
        self.notify().await;
        true
    }

    /// Forget the whole history; the dirty flag is kept
    pub async fn clear(&mut self) {
        let was_dirty = self.dirty();
        self.groups.clear();
        self.pending.clear();
        self.position = 0;
        self.saved_at = if was_dirty { None } else { Some(0) };
        self.notify().await;
    }

    pub fn can_undo(&self) -> bool {
        self.position > 0 || !self.pending.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.pending.is_empty() && self.position < self.groups.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Committed groups, undone ones included
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn groups(&self) -> &[UndoGroup] {
        &self.groups
    }

    async fn notify(&self) {
        let state = json!({
            "position": self.position,
            "len": self.groups.len(),
            "dirty": self.dirty(),
        });
        if let Err(e) = self.sink.emit(Address::All, UNDO_CHANGED, vec![state]).await {
            warn!("Failed to publish {}: {}", UNDO_CHANGED, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct Increment {
        counter: Arc<AtomicI64>,
        info: Value,
        dirty: bool,
    }

    impl Command for Increment {
        fn type_tag(&self) -> &str {
            "increment"
        }

        fn info(&self) -> &Value {
            &self.info
        }

        fn undo(&mut self) -> Result<(), String> {
            let by = self.info.as_i64().unwrap_or(1);
            self.counter.fetch_sub(by, Ordering::SeqCst);
            Ok(())
        }

        fn redo(&mut self) -> Result<(), String> {
            let by = self.info.as_i64().unwrap_or(1);
            self.counter.fetch_add(by, Ordering::SeqCst);
            Ok(())
        }

        fn dirty(&self) -> bool {
            self.dirty
        }
    }

    struct Broken {
        info: Value,
    }

    impl Command for Broken {
        fn type_tag(&self) -> &str {
            "broken"
        }

        fn info(&self) -> &Value {
            &self.info
        }

        fn undo(&mut self) -> Result<(), String> {
            Err("cannot undo".to_string())
        }

        fn redo(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    fn history(counter: &Arc<AtomicI64>) -> UndoCoordinator {
        let mut undo = UndoCoordinator::local();
        let c = counter.clone();
        undo.register("increment", move |info| {
            Box::new(Increment {
                counter: c.clone(),
                info,
                dirty: true,
            })
        });
        let c = counter.clone();
        undo.register("view", move |info| {
            Box::new(Increment {
                counter: c.clone(),
                info,
                dirty: false,
            })
        });
        undo
    }

    /// Apply the change, then record it
    fn bump(undo: &mut UndoCoordinator, counter: &AtomicI64, type_tag: &str) {
        counter.fetch_add(1, Ordering::SeqCst);
        undo.add(type_tag, json!(1)).unwrap();
    }

    #[tokio::test]
    async fn test_counter_roundtrip() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        for _ in 0..3 {
            bump(&mut undo, &counter, "increment");
            assert!(undo.commit().await);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(undo.dirty());

        undo.save().await;
        assert!(!undo.dirty());

        for _ in 0..3 {
            assert!(undo.undo().await.unwrap());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!undo.undo().await.unwrap());
        assert!(undo.dirty());

        for _ in 0..3 {
            assert!(undo.redo().await.unwrap());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!undo.redo().await.unwrap());
        assert!(!undo.dirty());
    }

    #[tokio::test]
    async fn test_group_undoes_in_reverse() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "increment");
        bump(&mut undo, &counter, "increment");
        undo.commit().await;
        assert_eq!(undo.len(), 1);
        assert_eq!(undo.groups()[0].len(), 2);

        undo.undo().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);
        assert!(!undo.commit().await);
        assert_eq!(undo.len(), 0);
        assert!(!undo.can_undo());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut undo = UndoCoordinator::local();
        let err = undo.add("missing", json!({})).unwrap_err();
        assert!(matches!(err, UndoError::UnknownCommand(t) if t == "missing"));
    }

    #[tokio::test]
    async fn test_undo_commits_pending_first() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "increment");
        assert_eq!(undo.pending_len(), 1);
        assert!(undo.can_undo());

        assert!(undo.undo().await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(undo.pending_len(), 0);
        assert!(undo.can_redo());
    }

    #[tokio::test]
    async fn test_commit_truncates_redo_tail() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        for _ in 0..3 {
            bump(&mut undo, &counter, "increment");
            undo.commit().await;
        }
        undo.undo().await.unwrap();
        undo.undo().await.unwrap();
        assert_eq!(undo.position(), 1);

        bump(&mut undo, &counter, "increment");
        undo.commit().await;
        assert_eq!(undo.len(), 2);
        assert_eq!(undo.position(), 2);
        assert!(!undo.can_redo());
    }

    #[tokio::test]
    async fn test_new_edit_after_undo_blocks_redo() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "increment");
        undo.commit().await;
        undo.undo().await.unwrap();
        assert!(undo.can_redo());

        bump(&mut undo, &counter, "increment");
        assert!(!undo.can_redo());
        assert!(!undo.redo().await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(undo.pending_len(), 0);
        assert_eq!(undo.len(), 1);
        assert_eq!(undo.position(), 1);

        assert!(undo.undo().await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_reverts_pending() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "increment");
        bump(&mut undo, &counter, "increment");
        undo.cancel().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(undo.pending_len(), 0);
        assert_eq!(undo.len(), 0);
    }

    #[tokio::test]
    async fn test_clean_commands_do_not_dirty() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "view");
        assert!(!undo.dirty());
        undo.commit().await;
        assert!(!undo.dirty());

        bump(&mut undo, &counter, "increment");
        assert!(undo.dirty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);
        undo.max_groups = 2;

        for _ in 0..4 {
            bump(&mut undo, &counter, "increment");
            undo.commit().await;
        }
        assert_eq!(undo.len(), 2);
        assert_eq!(undo.position(), 2);

        undo.undo().await.unwrap();
        undo.undo().await.unwrap();
        assert!(!undo.undo().await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        // The saved initial state was evicted
        assert!(undo.dirty());
    }

    #[tokio::test]
    async fn test_collapse_to() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        for _ in 0..4 {
            bump(&mut undo, &counter, "increment");
            undo.commit().await;
        }
        undo.undo().await.unwrap();
        assert_eq!(undo.position(), 3);

        assert!(undo.collapse_to(1).await);
        assert_eq!(undo.len(), 2);
        assert_eq!(undo.position(), 2);
        assert_eq!(undo.groups()[1].len(), 2);

        undo.undo().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!undo.collapse_to(5).await);
    }

    #[tokio::test]
    async fn test_failed_undo_keeps_position() {
        let mut undo = UndoCoordinator::local();
        undo.register("broken", |info| Box::new(Broken { info }));
        undo.add("broken", Value::Null).unwrap();
        undo.commit().await;

        let err = undo.undo().await.unwrap_err();
        assert!(matches!(
            err,
            UndoError::CommandFailed { ref type_tag, .. } if type_tag == "broken"
        ));
        assert_eq!(undo.position(), 1);
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let counter = Arc::new(AtomicI64::new(0));
        let sink = MemoryEventSink::new();
        let mut undo = UndoCoordinator::new(Arc::new(sink.clone()), &UndoConfig::default());
        let c = counter.clone();
        undo.register("increment", move |info| {
            Box::new(Increment {
                counter: c.clone(),
                info,
                dirty: true,
            })
        });

        bump(&mut undo, &counter, "increment");
        undo.commit_with_description("bump").await;
        undo.undo().await.unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].channel, UNDO_CHANGED);
        assert_eq!(events[0].args[0]["position"], json!(1));
        assert_eq!(events[1].args[0]["position"], json!(0));
        assert_eq!(events[1].args[0]["dirty"], json!(false));
        assert_eq!(undo.groups()[0].description(), Some("bump"));
    }

    #[tokio::test]
    async fn test_clear_keeps_dirty_flag() {
        let counter = Arc::new(AtomicI64::new(0));
        let mut undo = history(&counter);

        bump(&mut undo, &counter, "increment");
        undo.commit().await;
        undo.clear().await;
        assert_eq!(undo.len(), 0);
        assert!(undo.dirty());

        undo.save().await;
        undo.clear().await;
        assert!(!undo.dirty());
    }
}
