//! Operation log and undo/redo management.
//!
//! The history is an append-only sequence of committed operations in
//! compositing order. There is no total order across clients: each client
//! keeps operations in the order it created or received them, so two clients
//! can hold the same set of operations in different orders.

use crate::ops::Operation;
use crate::protocol::{ClearPayload, Event, OpRef};

/// How remote undo/redo notifications pick their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndoSemantics {
    /// Remote undo removes by id and falls back to popping the tail when the
    /// id is unknown; remote redo replays the top of this client's own undo
    /// stack. Compatible with every peer of the wire protocol.
    #[default]
    Positional,
    /// Remote undo and redo both resolve their target by `opId`;
    /// notifications naming an unknown id are ignored.
    ById,
}

/// Repaint required after a history change.
#[derive(Debug, Clone, PartialEq)]
pub enum Repaint {
    None,
    /// A pure tail append: only the new operation needs painting.
    Append(Operation),
    /// Anything else: the persistent surface must be replayed.
    Rebuild,
}

/// Side effects requested by a history mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub repaint: Repaint,
    /// Whether the room snapshot should be rewritten.
    pub persist: bool,
    /// Event to broadcast to the other participants.
    pub broadcast: Option<Event>,
}

impl Change {
    /// No effect at all.
    pub fn none() -> Self {
        Self {
            repaint: Repaint::None,
            persist: false,
            broadcast: None,
        }
    }

    fn rebuild() -> Self {
        Self {
            repaint: Repaint::Rebuild,
            persist: true,
            broadcast: None,
        }
    }

    fn broadcasting(mut self, event: Event) -> Self {
        self.broadcast = Some(event);
        self
    }

    pub fn is_none(&self) -> bool {
        self.repaint == Repaint::None && !self.persist && self.broadcast.is_none()
    }
}

/// Owner of the committed history and the undo stack.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    local_id: String,
    semantics: UndoSemantics,
    history: Vec<Operation>,
    undone: Vec<Operation>,
}

impl HistoryManager {
    /// Create an empty history for the given local participant.
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            semantics: UndoSemantics::default(),
            history: Vec::new(),
            undone: Vec::new(),
        }
    }

    /// Select how remote undo/redo notifications are resolved.
    pub fn with_semantics(mut self, semantics: UndoSemantics) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn semantics(&self) -> UndoSemantics {
        self.semantics
    }

    /// Committed operations in compositing order.
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    /// Operations available for redo, most recent last.
    pub fn undo_stack(&self) -> &[Operation] {
        &self.undone
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.history.iter().any(|op| op.id() == id)
    }

    /// Append a locally created operation. Invalidates redo history.
    pub fn commit(&mut self, op: Operation) -> Change {
        if self.contains(op.id()) {
            log::warn!("Ignoring commit of duplicate operation {}", op.id());
            return Change::none();
        }
        self.history.push(op.clone());
        self.undone.clear();
        Change {
            repaint: Repaint::Append(op.clone()),
            persist: true,
            broadcast: Some(Event::OpCommit(op)),
        }
    }

    /// Undo the most recent operation in this client's history.
    pub fn undo(&mut self) -> Change {
        let Some(op) = self.history.pop() else {
            return Change::none();
        };
        let op_id = op.id().to_string();
        self.undone.push(op);
        Change::rebuild().broadcasting(Event::OpUndo(OpRef {
            op_id: Some(op_id),
            by: Some(self.local_id.clone()),
        }))
    }

    /// Restore the most recently undone operation.
    pub fn redo(&mut self) -> Change {
        let Some(op) = self.undone.pop() else {
            return Change::none();
        };
        let op_id = op.id().to_string();
        self.history.push(op);
        Change::rebuild().broadcasting(Event::OpRedo(OpRef {
            op_id: Some(op_id),
            by: Some(self.local_id.clone()),
        }))
    }

    /// Drop all history and redo state.
    pub fn clear(&mut self) -> Change {
        self.history.clear();
        self.undone.clear();
        Change::rebuild().broadcasting(Event::OpClear(ClearPayload {
            by: Some(self.local_id.clone()),
        }))
    }

    /// Replace the history wholesale from an imported file. Not broadcast.
    pub fn import(&mut self, ops: Vec<Operation>) -> Change {
        self.replace(ops);
        Change::rebuild()
    }

    /// Restore a locally persisted snapshot. Nothing needs writing back.
    pub fn restore(&mut self, ops: Vec<Operation>) -> Change {
        self.replace(ops);
        Change {
            repaint: Repaint::Rebuild,
            persist: false,
            broadcast: None,
        }
    }

    fn replace(&mut self, ops: Vec<Operation>) {
        self.history.clear();
        self.undone.clear();
        for op in ops {
            if self.contains(op.id()) {
                log::warn!("Dropping duplicate operation {} from snapshot", op.id());
                continue;
            }
            self.history.push(op);
        }
    }

    /// Apply an event received from another participant.
    ///
    /// Events that do not concern the history yield [`Change::none`]. Events
    /// authored by the local participant were already applied when they were
    /// produced and are acknowledged without effect, so a transport that
    /// echoes sends back cannot apply them twice.
    pub fn apply_remote(&mut self, event: Event) -> Change {
        match event {
            Event::Init(ops) => {
                log::info!("Received history snapshot with {} operations", ops.len());
                self.replace(ops);
                Change::rebuild()
            }
            Event::OpCommit(op) => {
                if self.contains(op.id()) {
                    log::debug!("Operation {} already in history", op.id());
                    return Change::none();
                }
                self.history.push(op.clone());
                Change {
                    repaint: Repaint::Append(op),
                    persist: true,
                    broadcast: None,
                }
            }
            Event::OpUndo(r) if !self.is_own(&r.by) => self.remote_undo(r.op_id.as_deref()),
            Event::OpRedo(r) if !self.is_own(&r.by) => self.remote_redo(r.op_id.as_deref()),
            Event::OpClear(c) if !self.is_own(&c.by) => {
                self.history.clear();
                self.undone.clear();
                Change::rebuild()
            }
            _ => Change::none(),
        }
    }

    fn is_own(&self, by: &Option<String>) -> bool {
        by.as_deref() == Some(self.local_id.as_str())
    }

    fn remote_undo(&mut self, op_id: Option<&str>) -> Change {
        let index = op_id.and_then(|id| self.history.iter().position(|op| op.id() == id));
        match (index, self.semantics) {
            (Some(i), _) => {
                let op = self.history.remove(i);
                self.undone.push(op);
            }
            (None, UndoSemantics::Positional) => {
                // Unknown id: drop the tail without making it redoable.
                if let Some(op) = self.history.pop() {
                    log::debug!("Undo target {:?} not found, dropped tail {}", op_id, op.id());
                }
            }
            (None, UndoSemantics::ById) => {
                log::debug!("Undo target {:?} not found, ignoring", op_id);
                return Change::none();
            }
        }
        Change::rebuild()
    }

    fn remote_redo(&mut self, op_id: Option<&str>) -> Change {
        let op = match self.semantics {
            UndoSemantics::Positional => self.undone.pop(),
            UndoSemantics::ById => op_id
                .and_then(|id| self.undone.iter().position(|op| op.id() == id))
                .map(|i| self.undone.remove(i)),
        };
        match op {
            Some(op) => {
                self.history.push(op);
                Change::rebuild()
            }
            None => Change::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ShapeGeometry, ShapeOp, StrokeOp, StrokePoint, StrokeTool};

    fn stroke(id: &str) -> Operation {
        Operation::Stroke(StrokeOp {
            id: id.into(),
            user_id: "u1".into(),
            tool: StrokeTool::Brush,
            color: "#000000".into(),
            size: 4.0,
            path: vec![StrokePoint::new(0.0, 0.0, 4.0)],
        })
    }

    fn rect(id: &str) -> Operation {
        Operation::Shape(ShapeOp {
            id: id.into(),
            user_id: "u1".into(),
            color: "#000000".into(),
            size: 2.0,
            geometry: ShapeGeometry::Rect { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
        })
    }

    fn ids(ops: &[Operation]) -> Vec<&str> {
        ops.iter().map(|op| op.id()).collect()
    }

    fn undo_from(by: &str, op_id: &str) -> Event {
        Event::OpUndo(OpRef { op_id: Some(op_id.into()), by: Some(by.into()) })
    }

    #[test]
    fn test_commit_undo_redo_scenario() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("s1"));
        history.commit(rect("r1"));

        let change = history.undo();
        assert_eq!(ids(history.history()), vec!["s1"]);
        assert_eq!(ids(history.undo_stack()), vec!["r1"]);
        assert_eq!(change.repaint, Repaint::Rebuild);
        assert_eq!(change.broadcast, Some(undo_from("u1", "r1")));

        history.redo();
        assert_eq!(ids(history.history()), vec!["s1", "r1"]);
        assert!(history.undo_stack().is_empty());
    }

    #[test]
    fn test_commit_requests_append_paint() {
        let mut history = HistoryManager::new("u1");
        let change = history.commit(stroke("s1"));
        assert_eq!(change.repaint, Repaint::Append(stroke("s1")));
        assert!(change.persist);
        assert_eq!(change.broadcast, Some(Event::OpCommit(stroke("s1"))));
    }

    #[test]
    fn test_commit_clears_redo() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("s1"));
        history.undo();
        assert!(history.can_redo());
        history.commit(stroke("s2"));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_redo_on_empty_are_noops() {
        let mut history = HistoryManager::new("u1");
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_linear_undo_redo_restores_history() {
        let mut history = HistoryManager::new("u1");
        for i in 0..6 {
            history.commit(stroke(&format!("s{i}")));
        }
        let before = history.history().to_vec();
        for k in 0..=6 {
            for _ in 0..k {
                history.undo();
            }
            for _ in 0..k {
                history.redo();
            }
            assert_eq!(history.history(), before.as_slice(), "k = {k}");
        }
    }

    #[test]
    fn test_clear_broadcasts_and_empties() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("s1"));
        history.undo();
        let change = history.clear();
        assert!(history.is_empty());
        assert!(!history.can_redo());
        assert_eq!(change.broadcast, Some(Event::OpClear(ClearPayload { by: Some("u1".into()) })));
    }

    #[test]
    fn test_remote_init_replaces() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("local"));
        history.undo();
        let change = history.apply_remote(Event::Init(vec![stroke("a"), rect("b")]));
        assert_eq!(ids(history.history()), vec!["a", "b"]);
        assert!(history.undo_stack().is_empty());
        assert_eq!(change.repaint, Repaint::Rebuild);
        assert!(change.broadcast.is_none());
    }

    #[test]
    fn test_remote_commit_appends_without_broadcast() {
        let mut history = HistoryManager::new("u1");
        let change = history.apply_remote(Event::OpCommit(rect("r9")));
        assert_eq!(change.repaint, Repaint::Append(rect("r9")));
        assert!(change.persist);
        assert!(change.broadcast.is_none());
    }

    #[test]
    fn test_remote_commit_duplicate_ignored() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("s1"));
        assert!(history.apply_remote(Event::OpCommit(stroke("s1"))).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_remote_undo_removes_by_id_anywhere() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("a"));
        history.commit(stroke("b"));
        history.commit(stroke("c"));
        history.apply_remote(undo_from("u2", "a"));
        assert_eq!(ids(history.history()), vec!["b", "c"]);
        assert_eq!(ids(history.undo_stack()), vec!["a"]);
    }

    #[test]
    fn test_remote_undo_unknown_id_pops_tail() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("a"));
        history.commit(stroke("b"));
        let change = history.apply_remote(undo_from("u2", "missing"));
        assert_eq!(ids(history.history()), vec!["a"]);
        assert!(history.undo_stack().is_empty());
        assert_eq!(change.repaint, Repaint::Rebuild);
    }

    #[test]
    fn test_remote_redo_uses_own_stack() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("a"));
        history.commit(stroke("b"));
        history.undo();
        // Remote redo names another op, but positional semantics replay our own top.
        history.apply_remote(Event::OpRedo(OpRef { op_id: Some("zzz".into()), by: Some("u2".into()) }));
        assert_eq!(ids(history.history()), vec!["a", "b"]);
    }

    #[test]
    fn test_by_id_semantics() {
        let mut history = HistoryManager::new("u1").with_semantics(UndoSemantics::ById);
        history.commit(stroke("a"));
        history.commit(stroke("b"));
        assert!(history.apply_remote(undo_from("u2", "missing")).is_none());
        assert_eq!(history.len(), 2);

        history.apply_remote(undo_from("u2", "a"));
        history.undo();
        assert_eq!(ids(history.undo_stack()), vec!["a", "b"]);

        history.apply_remote(Event::OpRedo(OpRef { op_id: Some("a".into()), by: Some("u2".into()) }));
        assert_eq!(ids(history.history()), vec!["a"]);
        assert_eq!(ids(history.undo_stack()), vec!["b"]);
    }

    #[test]
    fn test_own_echo_is_ignored() {
        let mut history = HistoryManager::new("u1");
        history.commit(stroke("a"));
        history.commit(stroke("b"));
        let change = history.undo();
        let echo = change.broadcast.unwrap();
        assert!(history.apply_remote(echo).is_none());
        assert_eq!(ids(history.history()), vec!["a"]);
        assert_eq!(ids(history.undo_stack()), vec!["b"]);
    }

    #[test]
    fn test_concurrent_commits_diverge_in_order_only() {
        let mut alice = HistoryManager::new("alice");
        let mut bob = HistoryManager::new("bob");
        let a = alice.commit(stroke("from-alice")).broadcast.unwrap();
        let b = bob.commit(rect("from-bob")).broadcast.unwrap();
        alice.apply_remote(b);
        bob.apply_remote(a);

        let mut alice_ids = ids(alice.history());
        let mut bob_ids = ids(bob.history());
        assert_ne!(alice_ids, bob_ids);
        alice_ids.sort_unstable();
        bob_ids.sort_unstable();
        assert_eq!(alice_ids, bob_ids);
    }

    #[test]
    fn test_import_is_local_only() {
        let mut history = HistoryManager::new("u1");
        let change = history.import(vec![stroke("x"), stroke("x"), rect("y")]);
        assert_eq!(ids(history.history()), vec!["x", "y"]);
        assert!(change.broadcast.is_none());
        assert!(change.persist);
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let mut history = HistoryManager::new("u1");
        assert!(history.apply_remote(Event::join("main")).is_none());
    }
}
