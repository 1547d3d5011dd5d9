//! End-to-end editing scenarios driven through the engine with a fake
//! clock.

use std::cell::Cell;
use std::rc::Rc;

use tpl_canvas::history::MAX_ENTRIES;
use tpl_canvas::sync::{DEBOUNCE_WINDOW_MS, LOCK_WINDOW_MS};
use tpl_canvas::{
    Block, CanvasEngine, Clock, Document, NewBlock, PageSize, Position, ReorderDirection,
};

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

fn fresh_engine() -> (CanvasEngine<FakeClock>, FakeClock) {
    let clock = FakeClock::default();
    let engine = CanvasEngine::with_clock(Document::new(), PageSize::new(794, 1123), clock.clone());
    (engine, clock)
}

#[test]
fn reorder_then_undo_then_redo() {
    let (mut engine, _clock) = fresh_engine();
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
fn history_depth_is_bounded() {
    let (mut engine, _clock) = fresh_engine();
    // more committing operations than the history holds
    for i in 0..(MAX_ENTRIES as i64 + 10) {
        engine.insert_block(NewBlock::new(format!("<p>{i}</p>"), Position::new(i * 20, 0)));
    }
    let total = engine.document().blocks.len();
    assert_eq!(total, MAX_ENTRIES + 10);

    let mut undos = 0;
    loop {
        let before = engine.document().blocks.len();
        engine.undo();
        if engine.document().blocks.len() == before {
            break;
        }
        undos += 1;
    }
    // the initial empty snapshot was evicted, so undo stops at the oldest
    // surviving state instead of reaching an empty document
    assert_eq!(undos, MAX_ENTRIES - 1);
    assert_eq!(engine.document().blocks.len(), total - undos);
}

#[test]
fn redo_branch_is_discarded_by_new_commit() {
    let (mut engine, _clock) = fresh_engine();
    engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
    engine.insert_block(NewBlock::new("<p>b</p>", Position::new(100, 0)));
    engine.undo();
    assert_eq!(engine.document().blocks.len(), 1);

    engine.insert_block(NewBlock::new("<p>c</p>", Position::new(200, 0)));
    engine.redo();
    let contents: Vec<_> = engine
        .document()
        .blocks
        .iter()
        .map(|b| b.content.as_str())
        .collect();
    assert_eq!(contents, vec!["<p>a</p>", "<p>c</p>"]);
}

#[test]
fn lock_window_timing() {
    let (mut engine, clock) = fresh_engine();
    let local = engine.insert_block(NewBlock::new("<p>mine</p>", Position::new(0, 0)));
    engine.drain_outbox();

    let make_incoming = |engine: &CanvasEngine<FakeClock>| {
        let mut doc = engine.document().clone();
        doc.blocks
            .push(Block::new("<p>theirs</p>", Position::new(300, 300)));
        doc
    };

    // inside the window: suppressed
    clock.advance(LOCK_WINDOW_MS / 2);
    engine.accept_external_update(make_incoming(&engine));
    assert_eq!(engine.document().blocks.len(), 1);

    // past the window: the deferred add surfaces without another update
    clock.advance(LOCK_WINDOW_MS);
    engine.poll();
    assert_eq!(engine.document().blocks.len(), 2);
    assert!(engine.document().block(&local).is_some());
}

#[test]
fn echo_of_own_emission_is_ignored() {
    let (mut engine, clock) = fresh_engine();
    engine.insert_block(NewBlock::new("<p>a</p>", Position::new(0, 0)));
    engine.drain_outbox();

    // owner accepted our state once
    clock.advance(LOCK_WINDOW_MS + 100);
    let owned = engine.document().clone();
    engine.accept_external_update(owned.clone());
    let revision_doc = engine.document().clone();

    // a second echo with the same id set changes nothing
    clock.advance(1_000);
    engine.accept_external_update(owned);
    assert_eq!(engine.document(), &revision_doc);
}

#[test]
fn debounced_flow_edits_coalesce() {
    let (mut engine, clock) = fresh_engine();
    engine.set_flow_content("<p>h</p>".into());
    clock.advance(DEBOUNCE_WINDOW_MS / 2);
    engine.set_flow_content("<p>he</p>".into());
    clock.advance(DEBOUNCE_WINDOW_MS / 2);
    engine.set_flow_content("<p>hel</p>".into());

    engine.poll();
    assert!(engine.drain_outbox().is_empty());

    clock.advance(DEBOUNCE_WINDOW_MS + 10);
    engine.poll();
    let sent = engine.drain_outbox();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].flow_content, "<p>hel</p>");
}

#[test]
fn legacy_embedded_markup_loads_once() {
    let (mut engine, _clock) = fresh_engine();
    let legacy = Document {
        flow_content: "<h1>Report</h1><div class=\"tpl-block\" data-block-id=\"b_legacy\" \
                       style=\"position:absolute; left:120px; top:90px; width:200px\">\
                       <p>summary</p></div>"
            .into(),
        blocks: vec![],
    };
    engine.accept_external_update(legacy);

    assert_eq!(engine.document().flow_content, "<h1>Report</h1>");
    assert_eq!(engine.document().blocks.len(), 1);
    assert_eq!(engine.document().blocks[0].position, Position::new(120, 90));
}

#[test]
fn serialized_state_reloads_identically() {
    let (mut engine, _clock) = fresh_engine();
    engine.commit_flow_content("<h1>Title</h1>".into());
    engine.insert_block(
        NewBlock::new("<p>alpha</p>", Position::new(40, 60))
            .with_size(tpl_canvas::Dimension::Px(200), tpl_canvas::Dimension::Px(50)),
    );
    engine.insert_block(NewBlock::new("<p>beta</p>", Position::new(300, 500)));

    let restored = Document::parse(&engine.serialize());
    assert_eq!(restored.flow_content, "<h1>Title</h1>");
    assert_eq!(restored.block_ids(), engine.document().block_ids());
    for (orig, back) in engine.document().blocks.iter().zip(&restored.blocks) {
        assert_eq!(orig.content, back.content);
        assert_eq!(orig.position, back.position);
        assert_eq!(orig.width, back.width);
    }
}

#[test]
fn payloads_never_carry_internal_fields() {
    let (mut engine, _clock) = fresh_engine();
    let id = engine.insert_block(NewBlock::new("<p>x</p>", Position::new(0, 0)));
    let mut meta = tpl_canvas::Metadata::new();
    meta.insert("_scratch".into(), serde_json::json!(true));
    meta.insert("shape".into(), serde_json::json!("rect"));
    engine.update_block(
        &id,
        tpl_canvas::BlockPatch {
            metadata: Some(meta),
            ..Default::default()
        },
    );

    let sent = engine.drain_outbox();
    let last = sent.last().unwrap();
    assert!(last.blocks[0].last_local_edit_at.is_none());
    assert!(!last.blocks[0].metadata.contains_key("_scratch"));
    assert!(last.blocks[0].metadata.contains_key("shape"));
}
