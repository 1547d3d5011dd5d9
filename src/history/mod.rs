//! Bounded undo/redo history over document snapshots.
//!
//! Snapshots are taken only on committing operations (insert, delete, move,
//! resize, reorder, edit blur) so one undo step reverses one user action.
//! Pushing while the cursor sits mid-stack discards the redo branch first;
//! the stack holds at most [`MAX_ENTRIES`] snapshots, evicting oldest-first.

use crate::doc::Document;

pub const MAX_ENTRIES: usize = 50;

#[derive(Debug, Default)]
pub struct History {
    entries: Vec<Document>,
    cursor: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Pushes a deep copy of the document, discarding any redo branch.
    pub fn snapshot(&mut self, doc: &Document) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push(doc.clone());
        self.cursor = self.entries.len() - 1;
        if self.entries.len() > MAX_ENTRIES {
            self.entries.remove(0);
            self.cursor -= 1;
        }
    }

    /// Steps back one snapshot. The caller must apply the returned document
    /// and emit a change to the external owner.
    pub fn undo(&mut self) -> Option<Document> {
        if self.cursor == 0 || self.entries.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    /// Steps forward one snapshot; symmetric with [`History::undo`].
    pub fn redo(&mut self) -> Option<Document> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).cloned()
    }
}
