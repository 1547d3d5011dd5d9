//! Drag-to-promote gesture engine.
//!
//! Lets a user drag an inline content element (an inline image, a
//! placeholder token) straight into free positioning without an explicit
//! convert command. The module owns only the gesture state machine; block
//! creation, identity dedup against existing blocks, and flow-content
//! removal are wired up by the engine, which reacts to the [`Promotion`]
//! this module reports at the threshold crossing.
//!
//! The surface is renderer-agnostic: it describes the grabbed element as an
//! [`InlineElement`] keyed by an opaque `u64` and feeds pointer positions
//! already projected into logical page units.

use crate::doc::{markup, Markup, Position};
use std::collections::HashSet;
use tracing::debug;

/// Movement in either axis, in logical units, that turns an armed press
/// into a promotion.
pub const DRAG_THRESHOLD: i64 = 6;

/// Stable identity carried by some inline elements, used to dedup a
/// promotion against a block that already holds the same content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementIdentity {
    /// Question reference (`data-qid`).
    Question(String),
    /// Image source (`src`).
    Source(String),
}

impl ElementIdentity {
    /// Extracts the identity from an element's markup, if it carries one.
    /// A question reference wins over a plain image source.
    pub fn detect(content: &str) -> Option<Self> {
        if let Some(qid) = markup::question_ref(content) {
            return Some(Self::Question(qid.to_string()));
        }
        markup::source_ref(content).map(|src| Self::Source(src.to_string()))
    }
}

/// A promotable inline element as reported by the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineElement {
    /// Opaque per-element key, stable for the element's lifetime on the
    /// surface.
    pub key: u64,
    /// Outer markup of the element.
    pub content: Markup,
    /// Rendered size in logical units, when the surface can measure it.
    pub rendered_size: Option<(i64, i64)>,
    /// True when the element already lives inside a positioned block.
    pub within_block: bool,
}

/// Reported once per gesture, at the Armed to Promoted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub element: InlineElement,
    /// Pointer position in logical units at the moment the threshold was
    /// crossed.
    pub at: Position,
}

#[derive(Debug, Default)]
enum Gesture {
    #[default]
    Idle,
    Armed {
        element: InlineElement,
        origin: Position,
    },
    /// Threshold crossed; further moves belong to the block drag the
    /// engine runs.
    Promoted,
}

/// Per-surface gesture state. One instance per editing surface.
#[derive(Debug, Default)]
pub struct PromotionEngine {
    gesture: Gesture,
    converted: HashSet<u64>,
}

impl PromotionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the gesture. Elements already inside a block and elements
    /// promoted earlier in this interaction sequence never arm.
    pub fn pointer_down(&mut self, element: InlineElement, at: Position) -> bool {
        if element.within_block || self.converted.contains(&element.key) {
            self.gesture = Gesture::Idle;
            return false;
        }
        debug!(key = element.key, "armed inline element");
        self.gesture = Gesture::Armed {
            element,
            origin: at,
        };
        true
    }

    /// Advances the gesture; returns the promotion when the movement
    /// threshold is crossed.
    pub fn pointer_move(&mut self, at: Position) -> Option<Promotion> {
        let Gesture::Armed { element, origin } = &self.gesture else {
            return None;
        };
        let dx = (at.x - origin.x).abs();
        let dy = (at.y - origin.y).abs();
        if dx <= DRAG_THRESHOLD && dy <= DRAG_THRESHOLD {
            return None;
        }
        let element = element.clone();
        self.converted.insert(element.key);
        self.gesture = Gesture::Promoted;
        debug!(key = element.key, dx, dy, "promoting inline element");
        Some(Promotion { element, at })
    }

    /// Ends the gesture. A press released under the threshold promotes
    /// nothing and leaves the element eligible for a later attempt.
    pub fn pointer_up(&mut self) {
        self.gesture = Gesture::Idle;
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.gesture, Gesture::Armed { .. })
    }

    /// Forgets converted-element keys, e.g. after the surface re-renders
    /// flow content from scratch.
    pub fn reset(&mut self) {
        self.gesture = Gesture::Idle;
        self.converted.clear();
    }
}
