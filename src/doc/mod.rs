//! Canvas document model: flow content plus positioned, z-ordered blocks.
//!
//! A [`Document`] is the non-positioned flow stream and an ordered block
//! list; the list index encodes stacking order (index 0 is bottom-most).
//! Block metadata is an opaque JSON map that round-trips through the
//! interchange format unchanged.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

pub mod markup;

/// Opaque markup string. The engine never interprets it beyond the
/// positioned-fragment scanning in [`markup`].
pub type Markup = String;

/// Renderer-specific block attributes (shape kind, fill, question refs, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Millisecond timestamps, as supplied by the host clock.
pub type Millis = u64;

/// Metadata keys beginning with this marker are internal-only and are
/// stripped from every outbound emission.
pub const INTERNAL_KEY_MARKER: char = '_';

/// Block identifier, unique within a document.
///
/// A string newtype rather than a raw `Uuid`: the interchange format must
/// round-trip foreign id attributes exactly as they appear in the markup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Freshly generated unique id.
    pub fn generate() -> Self {
        Self(format!("b_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Position in logical document units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i64, dy: i64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// A block extent: absolute logical units or a percentage of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Px(i64),
    Percent(f64),
}

impl Dimension {
    /// Resolves the extent against a total (page) extent.
    pub fn resolve(&self, total: i64) -> i64 {
        match self {
            Dimension::Px(px) => *px,
            Dimension::Percent(pct) => ((total as f64) * pct / 100.0).round() as i64,
        }
    }

    pub fn as_px(&self) -> Option<i64> {
        match self {
            Dimension::Px(px) => Some(*px),
            Dimension::Percent(_) => None,
        }
    }

    /// Style-attribute rendering: `"120px"` or `"50%"`.
    pub fn to_css(&self) -> String {
        match self {
            Dimension::Px(px) => format!("{px}px"),
            Dimension::Percent(pct) => format!("{pct}%"),
        }
    }

    /// Parses `"120"`, `"120px"` or `"50%"`. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            return pct.trim().parse::<f64>().ok().map(Dimension::Percent);
        }
        let digits = raw.strip_suffix("px").unwrap_or(raw).trim();
        digits
            .parse::<f64>()
            .ok()
            .map(|v| Dimension::Px(v.round() as i64))
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Dimension::Px(px) => serializer.serialize_i64(*px),
            Dimension::Percent(pct) => serializer.serialize_str(&format!("{pct}%")),
        }
    }
}

struct DimensionVisitor;

impl<'de> Visitor<'de> for DimensionVisitor {
    type Value = Dimension;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of logical units or a percentage string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Dimension, E> {
        Ok(Dimension::Px(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Dimension, E> {
        Ok(Dimension::Px(v as i64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Dimension, E> {
        Ok(Dimension::Px(v.round() as i64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Dimension, E> {
        Dimension::parse(v).ok_or_else(|| E::custom(format!("invalid dimension: {v:?}")))
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DimensionVisitor)
    }
}

/// A positioned, resizable, independently stacked unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub content: Markup,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    /// Timestamp of the last local mutation. Internal-only; never emitted.
    #[serde(skip)]
    pub last_local_edit_at: Option<Millis>,
}

impl Block {
    pub fn new(content: impl Into<Markup>, position: Position) -> Self {
        Self {
            id: BlockId::generate(),
            content: content.into(),
            position,
            width: None,
            height: None,
            metadata: Metadata::new(),
            last_local_edit_at: None,
        }
    }

    /// Copy with the internal-only fields stripped, suitable for emission to
    /// the external owner.
    pub fn sanitized(&self) -> Block {
        let mut out = self.clone();
        out.last_local_edit_at = None;
        out.metadata
            .retain(|key, _| !key.starts_with(INTERNAL_KEY_MARKER));
        out
    }
}

/// The flow content stream plus the stacked block list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub flow_content: Markup,
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| &block.id == id)
    }

    pub fn block_index(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|block| &block.id == id)
    }

    /// Block ids in stacking order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|block| block.id.clone()).collect()
    }

    /// Identity set used by the sync protocol's echo detection.
    pub fn id_set(&self) -> BTreeSet<BlockId> {
        self.blocks.iter().map(|block| block.id.clone()).collect()
    }

    /// Renders the interchange markup: flow content followed by one
    /// positioned fragment per block, in stacking order.
    pub fn serialize(&self) -> Markup {
        markup::serialize_document(self)
    }

    /// Inverse of [`Document::serialize`]. Malformed per-block metadata
    /// parses to an empty map; the parse as a whole never fails.
    pub fn parse(raw: &str) -> Document {
        markup::parse_document(raw)
    }
}
