//! Composition root wiring the block store, history, synchronization
//! protocol, promotion gestures, and layout math into one editing engine.
//!
//! The engine is host-agnostic: a rendering surface feeds it pointer and
//! keyboard input in logical page units, drains outbound [`ChangePayload`]s
//! from the outbox, and calls [`CanvasEngine::poll`] on a timer so debounced
//! emissions and deferred external updates fire. Every committing operation
//! follows the same shape: mutate the store, snapshot history, arm the edit
//! lock, push an immediate emission, notify observers.

use crate::doc::{markup, BlockId, Dimension, Document, Markup, Position};
use crate::history::History;
use crate::layout::{self, BoxGeometry, Handle, NudgeKey, PageSize, MIN_BLOCK_EXTENT};
use crate::promote::{ElementIdentity, InlineElement, PromotionEngine};
use crate::store::{BlockPatch, BlockStore, NewBlock, ReorderDirection};
use crate::sync::{Acceptance, ChangePayload, Clock, SyncProtocol, SystemClock};
use tracing::debug;

/// Notification emitted after each state change, for hosts that mirror
/// engine state (selection outlines, toolbars, trace panels).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Inserted(BlockId),
    Updated(BlockId),
    Removed(BlockId),
    Reordered(BlockId),
    Duplicated { source: BlockId, copy: BlockId },
    Promoted(BlockId),
    FlowCommitted,
    Undo,
    Redo,
    ExternalApplied,
}

type Observer = Box<dyn FnMut(&EngineEvent)>;

#[derive(Debug, Clone)]
struct DragSession {
    id: BlockId,
    grab: Position,
    origin: Position,
}

#[derive(Debug, Clone)]
struct ResizeSession {
    id: BlockId,
    handle: Handle,
    grab: Position,
    origin: BoxGeometry,
}

/// The canvas editing engine.
pub struct CanvasEngine<C: Clock = SystemClock> {
    clock: C,
    store: BlockStore,
    history: History,
    sync: SyncProtocol,
    promotion: PromotionEngine,
    zoom: f64,
    page: PageSize,
    editor_focused: bool,
    outbox: Vec<ChangePayload>,
    observers: Vec<Observer>,
    drag: Option<DragSession>,
    resize: Option<ResizeSession>,
}

impl CanvasEngine<SystemClock> {
    pub fn new(page: PageSize) -> Self {
        Self::with_clock(Document::new(), page, SystemClock)
    }

    pub fn load(doc: Document, page: PageSize) -> Self {
        Self::with_clock(doc, page, SystemClock)
    }
}

impl<C: Clock> CanvasEngine<C> {
    pub fn with_clock(doc: Document, page: PageSize, clock: C) -> Self {
        let store = BlockStore::with_document(doc);
        let mut history = History::new();
        history.snapshot(store.document());
        Self {
            clock,
            store,
            history,
            sync: SyncProtocol::new(),
            promotion: PromotionEngine::new(),
            zoom: 1.0,
            page,
            editor_focused: false,
            outbox: Vec::new(),
            observers: Vec::new(),
            drag: None,
            resize: None,
        }
    }

    pub fn document(&self) -> &Document {
        self.store.document()
    }

    pub fn selected(&self) -> Option<&BlockId> {
        self.store.selected()
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn page_size(&self) -> PageSize {
        self.page
    }

    pub fn set_page_size(&mut self, page: PageSize) {
        self.page = page;
    }

    /// Registers a state-change observer; observers see events in commit
    /// order.
    pub fn observe(&mut self, observer: impl FnMut(&EngineEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, event: EngineEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    /// Shared tail of every committing operation.
    fn commit(&mut self, event: EngineEvent) {
        self.history.snapshot(self.store.document());
        self.sync.note_local_mutation(self.clock.now());
        let payload = self
            .sync
            .emit_immediate(ChangePayload::from_document(self.store.document()));
        self.outbox.push(payload);
        self.notify(event);
    }

    // block operations

    pub fn insert_block(&mut self, new: NewBlock) -> BlockId {
        let before = self.store.revision();
        let id = self.store.insert(new, self.clock.now());
        if self.store.revision() != before {
            self.commit(EngineEvent::Inserted(id.clone()));
        }
        id
    }

    pub fn update_block(&mut self, id: &BlockId, patch: BlockPatch) {
        let before = self.store.revision();
        self.store.update(id, patch, self.clock.now());
        if self.store.revision() != before {
            self.commit(EngineEvent::Updated(id.clone()));
        }
    }

    pub fn remove_block(&mut self, id: &BlockId) {
        let before = self.store.revision();
        self.store.remove(id);
        if self.store.revision() != before {
            self.commit(EngineEvent::Removed(id.clone()));
        }
    }

    pub fn reorder_block(&mut self, id: &BlockId, direction: ReorderDirection) {
        let before = self.store.revision();
        self.store.reorder(id, direction, self.clock.now());
        if self.store.revision() != before {
            self.commit(EngineEvent::Reordered(id.clone()));
        }
    }

    pub fn duplicate_block(&mut self, id: &BlockId) -> Option<BlockId> {
        let copy = self.store.duplicate(id, self.clock.now())?;
        self.commit(EngineEvent::Duplicated {
            source: id.clone(),
            copy: copy.clone(),
        });
        Some(copy)
    }

    /// Keyboard delete of the selected block.
    pub fn remove_selected(&mut self) {
        if let Some(id) = self.store.selected().cloned() {
            self.remove_block(&id);
        }
    }

    pub fn duplicate_selected(&mut self) -> Option<BlockId> {
        let id = self.store.selected().cloned()?;
        self.duplicate_block(&id)
    }

    pub fn select_block(&mut self, id: BlockId) {
        self.store.select(id);
    }

    pub fn clear_selection(&mut self) {
        self.store.clear_selection();
    }

    /// Inserts content dropped or pasted onto the page. An existing block
    /// with equal content within the position tolerance absorbs the drop;
    /// otherwise blocks sharing the dropped image source are removed first,
    /// so the last insert of a given source wins.
    pub fn insert_from_drop(&mut self, new: NewBlock) -> BlockId {
        if let Some(id) = self.store.find_near(&new.content, new.position).cloned() {
            debug!(%id, "drop absorbed by nearby block with equal content");
            self.store.select(id.clone());
            return id;
        }

        if let Some(src) = markup::source_ref(&new.content) {
            let src = src.to_string();
            self.store.remove_by_source_ref(&src);
        }
        let id = self.store.insert(new, self.clock.now());
        self.commit(EngineEvent::Inserted(id.clone()));
        id
    }

    // flow content

    /// Continuous edit from the content-editing widget; emitted behind the
    /// debounce window.
    pub fn set_flow_content(&mut self, flow: Markup) {
        let before = self.store.revision();
        self.store.set_flow_content(flow);
        if self.store.revision() == before {
            return;
        }
        let now = self.clock.now();
        self.sync.note_local_mutation(now);
        self.sync
            .queue_debounced(ChangePayload::from_document(self.store.document()), now);
    }

    /// Edit-session end (blur). Applies the final flow content and commits.
    pub fn commit_flow_content(&mut self, flow: Markup) {
        let before = self.store.revision();
        self.store.set_flow_content(flow);
        if self.store.revision() != before {
            self.commit(EngineEvent::FlowCommitted);
        }
    }

    pub fn set_editor_focused(&mut self, focused: bool) {
        self.editor_focused = focused;
    }

    // drag

    /// Starts dragging a block; `pointer` is in logical page units.
    pub fn begin_drag(&mut self, id: &BlockId, pointer: Position) -> bool {
        let Some(block) = self.store.document().block(id) else {
            return false;
        };
        self.drag = Some(DragSession {
            id: id.clone(),
            grab: pointer,
            origin: block.position,
        });
        self.store.select(id.clone());
        true
    }

    pub fn drag_move(&mut self, pointer: Position) {
        let Some(session) = self.drag.clone() else {
            return;
        };
        let next = Position::new(
            (session.origin.x + pointer.x - session.grab.x).max(0),
            (session.origin.y + pointer.y - session.grab.y).max(0),
        );
        let (width, height) = self.block_extents(&session.id);
        let next = layout::clamp_to_page(next, width, height, self.page);
        self.sync.note_local_mutation(self.clock.now());
        self.store.update(
            &session.id,
            BlockPatch {
                position: Some(next),
                ..Default::default()
            },
            self.clock.now(),
        );
    }

    /// Commits the drag. No movement means no history entry and no
    /// emission.
    pub fn end_drag(&mut self) {
        let Some(session) = self.drag.take() else {
            return;
        };
        let moved = self
            .store
            .document()
            .block(&session.id)
            .is_some_and(|block| block.position != session.origin);
        if moved {
            self.commit(EngineEvent::Updated(session.id));
        }
    }

    // resize

    pub fn begin_resize(&mut self, id: &BlockId, handle: Handle, pointer: Position) -> bool {
        let Some(block) = self.store.document().block(id) else {
            return false;
        };
        let origin = BoxGeometry::new(
            block.position,
            self.extent_px(block.width, self.page.width),
            self.extent_px(block.height, self.page.height),
        );
        self.resize = Some(ResizeSession {
            id: id.clone(),
            handle,
            grab: pointer,
            origin,
        });
        self.store.select(id.clone());
        true
    }

    pub fn resize_move(&mut self, pointer: Position) {
        let Some(session) = self.resize.clone() else {
            return;
        };
        let geometry = layout::resize(
            session.handle,
            session.origin,
            pointer.x - session.grab.x,
            pointer.y - session.grab.y,
        );
        self.sync.note_local_mutation(self.clock.now());
        self.store.update(
            &session.id,
            BlockPatch {
                position: Some(geometry.position),
                width: Some(Dimension::Px(geometry.width)),
                height: Some(Dimension::Px(geometry.height)),
                ..Default::default()
            },
            self.clock.now(),
        );
    }

    pub fn end_resize(&mut self) {
        let Some(session) = self.resize.take() else {
            return;
        };
        let changed = self
            .store
            .document()
            .block(&session.id)
            .is_some_and(|block| {
                block.position != session.origin.position
                    || block.width != Some(Dimension::Px(session.origin.width))
                    || block.height != Some(Dimension::Px(session.origin.height))
            });
        if changed {
            self.commit(EngineEvent::Updated(session.id));
        }
    }

    // keyboard

    /// Moves the selected block one keyboard step; snap and page clamp
    /// apply.
    pub fn nudge_selected(&mut self, key: NudgeKey, large: bool) {
        let Some(id) = self.store.selected().cloned() else {
            return;
        };
        let Some(block) = self.store.document().block(&id) else {
            return;
        };
        let next = layout::nudge(
            block.position,
            key,
            large,
            self.zoom,
            block.width,
            block.height,
            Some(self.page),
        );
        if next == block.position {
            return;
        }
        self.store.update(
            &id,
            BlockPatch {
                position: Some(next),
                ..Default::default()
            },
            self.clock.now(),
        );
        self.commit(EngineEvent::Updated(id));
    }

    // zoom

    pub fn zoom_in(&mut self) {
        self.zoom = layout::zoom_in(self.zoom);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = layout::zoom_out(self.zoom);
    }

    // promotion

    /// Pointer-down over a promotable inline element.
    pub fn promote_pointer_down(&mut self, element: InlineElement, pointer: Position) -> bool {
        self.promotion.pointer_down(element, pointer)
    }

    /// Pointer-move during a promotion gesture. Crossing the threshold
    /// creates (or re-targets) a block which then follows the pointer.
    pub fn promote_pointer_move(&mut self, pointer: Position) {
        if self.drag.is_some() {
            self.drag_move(pointer);
            return;
        }
        let Some(promotion) = self.promotion.pointer_move(pointer) else {
            return;
        };
        let element = promotion.element;

        if let Some(existing) = self.matching_block(&element).cloned() {
            // an equal element already lives as a block: drop the inline
            // copy and drag the block instead
            debug!(id = %existing, "promotion resolved to existing block");
            self.remove_inline(&element.content);
            self.commit(EngineEvent::Updated(existing.clone()));
            self.begin_drag(&existing, promotion.at);
            return;
        }

        let mut new = NewBlock::new(element.content.clone(), promotion.at);
        if let Some((w, h)) = element.rendered_size {
            new = new.with_size(Dimension::Px(w.max(1)), Dimension::Px(h.max(1)));
        }
        self.remove_inline(&element.content);
        let id = self.store.insert(new, self.clock.now());
        self.commit(EngineEvent::Promoted(id.clone()));
        self.begin_drag(&id, promotion.at);
    }

    pub fn promote_pointer_up(&mut self) {
        self.promotion.pointer_up();
        self.end_drag();
    }

    fn matching_block(&self, element: &InlineElement) -> Option<&BlockId> {
        let identity = ElementIdentity::detect(&element.content)?;
        self.store
            .document()
            .blocks
            .iter()
            .find(|block| match &identity {
                ElementIdentity::Question(qid) => {
                    markup::question_ref(&block.content) == Some(qid.as_str())
                }
                ElementIdentity::Source(src) => {
                    markup::source_ref(&block.content) == Some(src.as_str())
                }
            })
            .map(|block| &block.id)
    }

    /// Removes the first occurrence of a promoted element from the flow
    /// stream.
    fn remove_inline(&mut self, content: &str) {
        let flow = self.store.document().flow_content.clone();
        if flow.contains(content) {
            self.store.set_flow_content(flow.replacen(content, "", 1));
        }
    }

    // history

    pub fn undo(&mut self) {
        let Some(doc) = self.history.undo() else {
            return;
        };
        self.store.replace_document(doc);
        self.sync.note_local_mutation(self.clock.now());
        let payload = self
            .sync
            .emit_immediate(ChangePayload::from_document(self.store.document()));
        self.outbox.push(payload);
        self.notify(EngineEvent::Undo);
    }

    pub fn redo(&mut self) {
        let Some(doc) = self.history.redo() else {
            return;
        };
        self.store.replace_document(doc);
        self.sync.note_local_mutation(self.clock.now());
        let payload = self
            .sync
            .emit_immediate(ChangePayload::from_document(self.store.document()));
        self.outbox.push(payload);
        self.notify(EngineEvent::Redo);
    }

    // synchronization

    /// Feeds an owner-supplied document through the acceptance rules.
    pub fn accept_external_update(&mut self, incoming: Document) {
        let outcome = self.sync.accept_external(
            incoming,
            self.store.document(),
            self.editor_focused,
            self.clock.now(),
        );
        if let Acceptance::Applied(doc) = outcome {
            self.store.replace_document(doc);
            self.notify(EngineEvent::ExternalApplied);
        }
    }

    /// Fires due debounced emissions and surfaces updates deferred by the
    /// edit lock. Hosts call this on a timer.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        if let Some(payload) = self.sync.poll_emission(now) {
            self.outbox.push(payload);
        }
        if let Some(doc) = self.sync.take_deferred(now, self.editor_focused) {
            self.store.replace_document(doc);
            self.notify(EngineEvent::ExternalApplied);
        }
    }

    /// Drains pending outbound payloads, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<ChangePayload> {
        std::mem::take(&mut self.outbox)
    }

    pub fn serialize(&self) -> Markup {
        self.store.serialize()
    }

    fn block_extents(&self, id: &BlockId) -> (Option<Dimension>, Option<Dimension>) {
        self.store
            .document()
            .block(id)
            .map(|block| (block.width, block.height))
            .unwrap_or((None, None))
    }

    fn extent_px(&self, dim: Option<Dimension>, total: i64) -> i64 {
        match dim {
            Some(dim) => {
                let extent = dim.resolve(total);
                if extent > 0 { extent } else { MIN_BLOCK_EXTENT }
            }
            None => MIN_BLOCK_EXTENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Block;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeClock(Rc<Cell<u64>>);

    impl FakeClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> u64 {
            self.0.get()
        }
    }

    fn engine() -> (CanvasEngine<FakeClock>, FakeClock) {
        let clock = FakeClock::default();
        let engine =
            CanvasEngine::with_clock(Document::new(), PageSize::new(794, 1123), clock.clone());
        (engine, clock)
    }

    #[test]
    fn test_insert_commits_and_emits_immediately() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>hi</p>", Position::new(30, 40)));
        assert_eq!(engine.selected(), Some(&id));
        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].immediate);
        assert_eq!(sent[0].blocks.len(), 1);
    }

    #[test]
    fn test_deduped_insert_does_not_emit() {
        let (mut engine, _clock) = engine();
        engine.insert_block(NewBlock::new("<p>hi</p>", Position::new(30, 40)));
        engine.drain_outbox();
        let again = engine.insert_block(NewBlock::new("<p>hi</p>", Position::new(32, 38)));
        assert_eq!(engine.document().blocks.len(), 1);
        assert_eq!(engine.selected(), Some(&again));
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_flow_edit_is_debounced_then_fires() {
        let (mut engine, clock) = engine();
        engine.set_flow_content("<p>a</p>".into());
        clock.advance(100);
        engine.set_flow_content("<p>ab</p>".into());
        engine.poll();
        assert!(engine.drain_outbox().is_empty());

        clock.advance(250);
        engine.poll();
        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flow_content, "<p>ab</p>");
        assert!(!sent[0].immediate);
    }

    #[test]
    fn test_structural_op_cancels_debounced_emission() {
        let (mut engine, clock) = engine();
        engine.set_flow_content("<p>typing</p>".into());
        engine.insert_block(NewBlock::new("<p>b</p>", Position::new(0, 0)));
        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].immediate);

        clock.advance(1_000);
        engine.poll();
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (mut engine, _clock) = engine();
        let a = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
        let b = engine.insert_block(NewBlock::new("<p>b</p>", Position::new(100, 0)));
        engine.reorder_block(&a, ReorderDirection::Front);
        assert_eq!(engine.document().block_ids(), vec![b.clone(), a.clone()]);

        engine.undo();
        assert_eq!(engine.document().block_ids(), vec![a.clone(), b.clone()]);
        engine.redo();
        assert_eq!(engine.document().block_ids(), vec![b, a]);
    }

    #[test]
    fn test_drag_commits_on_release_only() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(50, 50)));
        engine.drain_outbox();

        assert!(engine.begin_drag(&id, Position::new(55, 55)));
        engine.drag_move(Position::new(155, 105));
        assert!(engine.drain_outbox().is_empty());
        let moved = engine.document().block(&id).unwrap().position;
        assert_eq!(moved, Position::new(150, 100));

        engine.end_drag();
        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].immediate);
    }

    #[test]
    fn test_drag_without_movement_adds_no_history() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(50, 50)));
        engine.drain_outbox();
        engine.begin_drag(&id, Position::new(55, 55));
        engine.end_drag();
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_resize_east_keeps_left_edge() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(
            NewBlock::new("<p>a</p>", Position::new(100, 100))
                .with_size(Dimension::Px(200), Dimension::Px(80)),
        );
        engine.begin_resize(&id, Handle::East, Position::new(300, 140));
        engine.resize_move(Position::new(340, 140));
        engine.end_resize();

        let block = engine.document().block(&id).unwrap();
        assert_eq!(block.position, Position::new(100, 100));
        assert_eq!(block.width, Some(Dimension::Px(240)));
        assert_eq!(block.height, Some(Dimension::Px(80)));
    }

    #[test]
    fn test_nudge_selected_snaps_and_emits() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(50, 50)));
        engine.drain_outbox();
        engine.nudge_selected(NudgeKey::Right, true);
        let block = engine.document().block(&id).unwrap();
        assert_eq!(block.position, Position::new(60, 50));
        assert_eq!(engine.drain_outbox().len(), 1);
    }

    #[test]
    fn test_external_update_suppressed_during_lock_then_applied() {
        let (mut engine, clock) = engine();
        engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
        engine.drain_outbox();

        let mut incoming = engine.document().clone();
        incoming
            .blocks
            .push(Block::new("<p>from owner</p>", Position::new(300, 300)));

        clock.advance(400);
        engine.accept_external_update(incoming.clone());
        assert_eq!(engine.document().blocks.len(), 1);

        // lock expired: the deferred addition surfaces on poll
        clock.advance(500);
        engine.poll();
        assert_eq!(engine.document().blocks.len(), 2);
    }

    #[test]
    fn test_deferred_update_dropped_after_later_local_edit() {
        let (mut engine, clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
        engine.drain_outbox();

        // owner echoes the pre-insert state during the lock window
        let stale = Document {
            flow_content: String::new(),
            blocks: vec![Block::new("<p>owner</p>", Position::new(0, 0))],
        };
        clock.advance(400);
        engine.accept_external_update(stale);

        // a fresher local edit lands while the update is parked
        clock.advance(200);
        engine.update_block(
            &id,
            BlockPatch {
                position: Some(Position::new(500, 500)),
                ..Default::default()
            },
        );

        clock.advance(900);
        engine.poll();
        let block = engine.document().block(&id).unwrap();
        assert_eq!(block.position, Position::new(500, 500));
        assert_eq!(engine.document().blocks.len(), 1);
    }

    #[test]
    fn test_deferred_update_held_while_focused() {
        let (mut engine, clock) = engine();
        engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
        engine.commit_flow_content("<p>local flow</p>".into());
        engine.drain_outbox();

        let mut incoming = engine.document().clone();
        incoming.flow_content = "<p>owner flow</p>".into();
        incoming
            .blocks
            .push(Block::new("<p>added</p>", Position::new(300, 300)));
        clock.advance(400);
        engine.accept_external_update(incoming);

        engine.set_editor_focused(true);
        clock.advance(1_000);
        engine.poll();
        assert_eq!(engine.document().flow_content, "<p>local flow</p>");

        // applied once the edit session ends
        engine.set_editor_focused(false);
        engine.poll();
        assert_eq!(engine.document().flow_content, "<p>owner flow</p>");
        assert_eq!(engine.document().blocks.len(), 2);
    }

    #[test]
    fn test_drop_within_tolerance_is_absorbed() {
        let (mut engine, _clock) = engine();
        let first =
            engine.insert_from_drop(NewBlock::new("<img src=\"a.png\">", Position::new(100, 100)));
        engine.drain_outbox();

        let again =
            engine.insert_from_drop(NewBlock::new("<img src=\"a.png\">", Position::new(103, 98)));
        assert_eq!(again, first);
        assert_eq!(engine.document().blocks.len(), 1);
        assert_eq!(engine.selected(), Some(&first));
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_focused_editor_ignores_external_updates() {
        let (mut engine, clock) = engine();
        engine.set_editor_focused(true);
        clock.advance(5_000);

        let mut incoming = Document::new();
        incoming
            .blocks
            .push(Block::new("<p>x</p>", Position::new(0, 0)));
        engine.accept_external_update(incoming);
        assert!(engine.document().blocks.is_empty());
        engine.poll();
        assert!(engine.document().blocks.is_empty());
    }

    #[test]
    fn test_promotion_creates_block_and_strips_inline() {
        let (mut engine, _clock) = engine();
        engine.commit_flow_content("<p>before</p><img src=\"pic.png\"><p>after</p>".into());
        engine.drain_outbox();

        let element = InlineElement {
            key: 1,
            content: "<img src=\"pic.png\">".into(),
            rendered_size: Some((120, 80)),
            within_block: false,
        };
        assert!(engine.promote_pointer_down(element, Position::new(200, 200)));
        engine.promote_pointer_move(Position::new(210, 200));

        assert_eq!(engine.document().blocks.len(), 1);
        assert_eq!(engine.document().flow_content, "<p>before</p><p>after</p>");
        let block = &engine.document().blocks[0];
        assert_eq!(block.position, Position::new(210, 200));
        assert_eq!(block.width, Some(Dimension::Px(120)));
        assert!(engine.drain_outbox().iter().any(|p| p.immediate));

        // the block keeps following the pointer
        engine.promote_pointer_move(Position::new(260, 240));
        assert_eq!(
            engine.document().blocks[0].position,
            Position::new(260, 240)
        );
        engine.promote_pointer_up();
    }

    #[test]
    fn test_promotion_dedups_against_existing_source() {
        let (mut engine, _clock) = engine();
        let existing =
            engine.insert_block(NewBlock::new("<img src=\"pic.png\">", Position::new(10, 10)));
        engine.commit_flow_content("<img src=\"pic.png\">".into());
        engine.drain_outbox();

        let element = InlineElement {
            key: 2,
            content: "<img src=\"pic.png\">".into(),
            rendered_size: None,
            within_block: false,
        };
        engine.promote_pointer_down(element, Position::new(400, 400));
        engine.promote_pointer_move(Position::new(410, 400));

        assert_eq!(engine.document().blocks.len(), 1);
        assert_eq!(engine.selected(), Some(&existing));
        assert!(engine.document().flow_content.is_empty());
        engine.promote_pointer_up();
    }

    #[test]
    fn test_drop_last_insert_wins_for_same_source() {
        let (mut engine, _clock) = engine();
        engine.insert_from_drop(NewBlock::new("<img src=\"logo.png\">", Position::new(10, 10)));
        let second =
            engine.insert_from_drop(NewBlock::new("<img src=\"logo.png\">", Position::new(400, 400)));
        assert_eq!(engine.document().blocks.len(), 1);
        assert_eq!(engine.document().blocks[0].id, second);
        assert_eq!(engine.document().blocks[0].position, Position::new(400, 400));
    }

    #[test]
    fn test_keyboard_delete_and_duplicate_selected() {
        let (mut engine, _clock) = engine();
        let id = engine.insert_block(NewBlock::new("<p>a</p>", Position::new(50, 50)));
        let copy = engine.duplicate_selected().unwrap();
        assert_eq!(engine.document().blocks.len(), 2);
        assert_eq!(
            engine.document().block(&copy).unwrap().position,
            Position::new(60, 60)
        );

        // the copy is selected after duplication
        engine.remove_selected();
        assert_eq!(engine.document().blocks.len(), 1);
        assert!(engine.document().block(&id).is_some());
        assert_eq!(engine.selected(), None);
    }

    #[test]
    fn test_observers_see_commit_events() {
        let (mut engine, _clock) = engine();
        let seen = Rc::new(Cell::new(0usize));
        let counter = seen.clone();
        engine.observe(move |event| {
            if matches!(event, EngineEvent::Inserted(_)) {
                counter.set(counter.get() + 1);
            }
        });
        engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
        engine.insert_block(NewBlock::new("<p>b</p>", Position::new(100, 0)));
        assert_eq!(seen.get(), 2);
    }
}
