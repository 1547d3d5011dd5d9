//! tpl-canvas: document model and editing engine for a free-positioning
//! report-template canvas.
//!
//! A template document is a flow-content stream plus an ordered list of
//! absolutely positioned blocks layered over a fixed-size page. This crate
//! owns the editing semantics behind such a canvas and stays renderer- and
//! transport-agnostic. It includes:
//!
//! - **Document model** - blocks, positions, dimensions, and the embedded
//!   markup interchange format
//! - **Block store** - ordered block list with insert dedup, patching,
//!   restacking, and duplication
//! - **History** - bounded snapshot undo/redo
//! - **Sync protocol** - debounced/immediate change emission and
//!   echo-resistant acceptance of external document state
//! - **Promotion** - drag an inline element straight into free positioning
//! - **Layout** - zoom projection, grid snap, page clamping, resize math
//!
//! # Quick Start
//!
//! ```rust
//! use tpl_canvas::{CanvasEngine, NewBlock, PageSize, Position};
//!
//! // A4 at 96 dpi
//! let mut engine = CanvasEngine::new(PageSize::new(794, 1123));
//!
//! let id = engine.insert_block(NewBlock::new("<p>Total: {{sum}}</p>", Position::new(40, 60)));
//! engine.undo();
//! assert!(engine.document().block(&id).is_none());
//!
//! // every committed change lands in the outbox for the document owner
//! let payloads = engine.drain_outbox();
//! assert!(payloads.iter().all(|p| p.immediate));
//! ```

// Document model and interchange markup
pub mod doc;

// Ordered block list and its operations
pub mod store;

// Bounded snapshot undo/redo
pub mod history;

// Pure coordinate and layout math
pub mod layout;

// Change emission and external-state acceptance
pub mod sync;

// Drag-to-promote gesture state machine
pub mod promote;

// Composition root
pub mod engine;

// Re-export doc types
pub use doc::{Block, BlockId, Dimension, Document, Markup, Metadata, Millis, Position};

// Re-export store types
pub use store::{BlockPatch, BlockStore, NewBlock, ReorderDirection};

// Re-export history types
pub use history::History;

// Re-export layout types
pub use layout::{BoxGeometry, Handle, NudgeKey, PageSize};

// Re-export sync types
pub use sync::{
    Acceptance, ChangePayload, Clock, IgnoreReason, SyncProtocol, SystemClock,
};

// Re-export promotion types
pub use promote::{ElementIdentity, InlineElement, Promotion, PromotionEngine};

// Re-export the engine
pub use engine::{CanvasEngine, EngineEvent};
