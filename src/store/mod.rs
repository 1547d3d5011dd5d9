//! Block Store: the canonical in-memory document and its mutation API.
//!
//! All components mutate the document only through this store. Every call
//! that actually changes state bumps a revision counter the engine reads to
//! arm the edit lock and schedule emissions. Mutations referencing unknown
//! block ids are silent no-ops.

use crate::doc::{
    Block, BlockId, Dimension, Document, Markup, Metadata, Millis, Position,
};

/// Two inserts whose positions differ by at most this much per axis (with
/// equal content) are treated as the same gesture firing twice.
pub const DEDUP_TOLERANCE: i64 = 4;

/// Offset applied to a duplicated block so the copy is visibly distinct.
pub const DUPLICATE_OFFSET: i64 = 10;

/// Z-order moves. `Forward`/`Backward` swap one step toward the top/bottom;
/// `Front`/`Back` move to the absolute top/bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderDirection {
    Forward,
    Backward,
    Front,
    Back,
}

/// Partial block update; `None` fields are left untouched. Metadata is
/// merged key-wise, not replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct BlockPatch {
    pub position: Option<Position>,
    pub width: Option<Dimension>,
    pub height: Option<Dimension>,
    pub content: Option<Markup>,
    pub metadata: Option<Metadata>,
}

/// Descriptor for a new block insertion.
#[derive(Debug, Clone, Default)]
pub struct NewBlock {
    pub content: Markup,
    pub position: Position,
    pub width: Option<Dimension>,
    pub height: Option<Dimension>,
    pub metadata: Metadata,
}

impl NewBlock {
    pub fn new(content: impl Into<Markup>, position: Position) -> Self {
        Self {
            content: content.into(),
            position,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: Dimension, height: Dimension) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Default)]
pub struct BlockStore {
    doc: Document,
    selected: Option<BlockId>,
    revision: u64,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: Document) -> Self {
        Self {
            doc,
            selected: None,
            revision: 0,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Monotonic counter bumped by every effective mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn selected(&self) -> Option<&BlockId> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, id: BlockId) {
        self.selected = Some(id);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Creates a block at the top of the stacking order and selects it.
    ///
    /// If an existing block has equal content within [`DEDUP_TOLERANCE`] of
    /// the requested position, no block is created; the existing one is
    /// selected and its id returned.
    pub fn insert(&mut self, new: NewBlock, now: Millis) -> BlockId {
        if let Some(existing) = self.find_near(&new.content, new.position) {
            let id = existing.clone();
            self.selected = Some(id.clone());
            return id;
        }

        let mut block = Block::new(new.content, new.position);
        block.width = new.width;
        block.height = new.height;
        block.metadata = new.metadata;
        block.last_local_edit_at = Some(now);
        let id = block.id.clone();
        self.doc.blocks.push(block);
        self.selected = Some(id.clone());
        self.revision += 1;
        id
    }

    /// Existing block with equal content within [`DEDUP_TOLERANCE`] of the
    /// position, shared by the insert and drop dedup paths.
    pub(crate) fn find_near(&self, content: &str, position: Position) -> Option<&BlockId> {
        let near = |a: i64, b: i64| (a - b).abs() <= DEDUP_TOLERANCE;
        self.doc
            .blocks
            .iter()
            .find(|block| {
                block.content == content
                    && near(block.position.x, position.x)
                    && near(block.position.y, position.y)
            })
            .map(|block| &block.id)
    }

    /// Merges the patch into the block. Unknown id is a silent no-op.
    pub fn update(&mut self, id: &BlockId, patch: BlockPatch, now: Millis) {
        let Some(index) = self.doc.block_index(id) else {
            return;
        };
        let block = &mut self.doc.blocks[index];
        if let Some(position) = patch.position {
            block.position = position;
        }
        if let Some(width) = patch.width {
            block.width = Some(width);
        }
        if let Some(height) = patch.height {
            block.height = Some(height);
        }
        if let Some(content) = patch.content {
            block.content = content;
        }
        if let Some(metadata) = patch.metadata {
            for (key, value) in metadata {
                block.metadata.insert(key, value);
            }
        }
        block.last_local_edit_at = Some(now);
        self.revision += 1;
    }

    /// Deletes the block. Unknown id is a silent no-op.
    pub fn remove(&mut self, id: &BlockId) {
        let Some(index) = self.doc.block_index(id) else {
            return;
        };
        self.doc.blocks.remove(index);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        self.revision += 1;
    }

    /// Restacks the block; boundary moves are no-ops.
    pub fn reorder(&mut self, id: &BlockId, direction: ReorderDirection, now: Millis) {
        let Some(index) = self.doc.block_index(id) else {
            return;
        };
        let top = self.doc.blocks.len() - 1;
        let target = match direction {
            ReorderDirection::Forward if index < top => index + 1,
            ReorderDirection::Backward if index > 0 => index - 1,
            ReorderDirection::Front if index < top => top,
            ReorderDirection::Back if index > 0 => 0,
            _ => return,
        };
        let mut block = self.doc.blocks.remove(index);
        block.last_local_edit_at = Some(now);
        self.doc.blocks.insert(target, block);
        self.revision += 1;
    }

    /// Clones the block with a fresh id, offset so the copy is visible.
    /// Returns `None` (silently) for an unknown id.
    pub fn duplicate(&mut self, id: &BlockId, now: Millis) -> Option<BlockId> {
        let source = self.doc.block(id)?;
        let mut copy = source.clone();
        copy.id = BlockId::generate();
        copy.position = copy.position.offset(DUPLICATE_OFFSET, DUPLICATE_OFFSET);
        copy.last_local_edit_at = Some(now);
        let copy_id = copy.id.clone();
        self.doc.blocks.push(copy);
        self.selected = Some(copy_id.clone());
        self.revision += 1;
        Some(copy_id)
    }

    /// Re-synchronizes the flow stream from a content-editing widget.
    pub fn set_flow_content(&mut self, flow: Markup) {
        if self.doc.flow_content == flow {
            return;
        }
        self.doc.flow_content = flow;
        self.revision += 1;
    }

    /// Wholesale document replacement (undo/redo, accepted external state).
    pub fn replace_document(&mut self, doc: Document) {
        if let Some(selected) = &self.selected
            && doc.block(selected).is_none()
        {
            self.selected = None;
        }
        self.doc = doc;
        self.revision += 1;
    }

    /// Removes every block whose content carries the given source reference.
    /// Used by the drop/paste path's last-insert-wins dedup rule.
    pub fn remove_by_source_ref(&mut self, source: &str) {
        let before = self.doc.blocks.len();
        self.doc.blocks.retain(|block| !block.content.contains(source));
        if self.doc.blocks.len() != before {
            if let Some(selected) = &self.selected
                && self.doc.block(selected).is_none()
            {
                self.selected = None;
            }
            self.revision += 1;
        }
    }

    pub fn serialize(&self) -> Markup {
        self.doc.serialize()
    }
}
