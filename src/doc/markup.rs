//! Interchange format for canvas documents.
//!
//! A document serializes to its flow content followed by one positioned
//! fragment per block, in stacking order:
//!
//! ```text
//! <div class="tpl-block" data-block-id="ID" data-block-json='META'
//!      style="position:absolute; left:Xpx; top:Ypx; width:W; height:H">CONTENT</div>
//! ```
//!
//! The `data-block-json` attribute carries the block metadata merged with
//! `left`/`top`/`width`/`height`/`html`, JSON-encoded with `<` and `'`
//! escaped so the single-quoted attribute survives naive re-rendering.
//! Parsing is lenient: a malformed fragment degrades to defaults instead of
//! failing the whole document.

use super::{Block, BlockId, Dimension, Document, Markup, Metadata, Position};
use serde_json::Value;
use std::collections::BTreeSet;

const FRAGMENT_CLASS: &str = "class=\"tpl-block\"";

/// Default coordinate when neither the style attribute nor the metadata
/// carries one.
const FALLBACK_COORD: i64 = 20;

/// Internal parse failure for a single fragment. Never escapes
/// [`parse_document`]; the affected fragment falls back to defaults or is
/// passed through as flow content.
#[derive(Debug, thiserror::Error)]
pub(crate) enum MarkupError {
    #[error("unterminated fragment")]
    Unterminated,
    #[error("missing block id attribute")]
    MissingId,
}

/// True when the markup embeds positioned fragments, used by the sync
/// protocol's legacy acceptance path.
pub fn contains_fragments(raw: &str) -> bool {
    raw.contains(FRAGMENT_CLASS)
}

/// Extracts the first image source reference from a markup fragment.
pub fn source_ref(markup: &str) -> Option<&str> {
    attr_value(markup, "src")
}

/// Extracts the first question reference (`data-qid`) from a markup fragment.
pub fn question_ref(markup: &str) -> Option<&str> {
    attr_value(markup, "data-qid")
}

pub fn serialize_document(doc: &Document) -> Markup {
    let mut out = doc.flow_content.clone();
    for block in &doc.blocks {
        out.push_str(&serialize_block(block));
    }
    out
}

fn serialize_block(block: &Block) -> String {
    let mut meta = serde_json::Map::new();
    for (key, value) in &block.metadata {
        meta.insert(key.clone(), value.clone());
    }
    meta.insert("left".into(), Value::from(block.position.x));
    meta.insert("top".into(), Value::from(block.position.y));
    if let Some(width) = block.width {
        meta.insert("width".into(), dimension_value(width));
    }
    if let Some(height) = block.height {
        meta.insert("height".into(), dimension_value(height));
    }
    meta.insert("html".into(), Value::from(block.content.clone()));

    let json = serde_json::to_string(&Value::Object(meta)).unwrap_or_else(|_| "{}".to_string());
    let escaped = escape_attr(&json);

    let mut style = format!(
        "position:absolute; left:{}px; top:{}px",
        block.position.x, block.position.y
    );
    if let Some(width) = block.width {
        style.push_str(&format!("; width:{}", width.to_css()));
    }
    if let Some(height) = block.height {
        style.push_str(&format!("; height:{}", height.to_css()));
    }

    format!(
        "<div class=\"tpl-block\" data-block-id=\"{}\" data-block-json='{}' style=\"{}\">{}</div>",
        block.id, escaped, style, block.content
    )
}

pub fn parse_document(raw: &str) -> Document {
    let mut flow = String::new();
    let mut blocks = Vec::new();
    let mut seen: BTreeSet<BlockId> = BTreeSet::new();
    let mut cursor = 0;

    while let Some(open) = find_fragment_open(raw, cursor) {
        flow.push_str(&raw[cursor..open]);
        match split_fragment(raw, open) {
            Ok(fragment) => {
                match parse_fragment(fragment.tag, fragment.inner, &mut seen) {
                    Ok(block) => blocks.push(block),
                    // fragment without a usable id: drop it from the block
                    // list but keep its inner content in the flow
                    Err(MarkupError::MissingId) => flow.push_str(fragment.inner),
                    Err(MarkupError::Unterminated) => {}
                }
                cursor = fragment.end;
            }
            Err(_) => {
                // no matching close tag; pass the rest through as flow
                flow.push_str(&raw[open..]);
                cursor = raw.len();
            }
        }
    }
    flow.push_str(&raw[cursor..]);

    Document {
        flow_content: flow,
        blocks,
    }
}

struct Fragment<'a> {
    /// The opening `<div ...>` tag text.
    tag: &'a str,
    /// Content between the opening tag and its matching close.
    inner: &'a str,
    /// Byte offset just past the closing `</div>`.
    end: usize,
}

/// Finds the next `<div` whose opening tag carries the fragment class.
fn find_fragment_open(raw: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(rel) = raw[at..].find("<div") {
        let open = at + rel;
        let tag_end = match raw[open..].find('>') {
            Some(end) => open + end,
            None => return None,
        };
        if raw[open..tag_end].contains(FRAGMENT_CLASS) {
            return Some(open);
        }
        at = open + 4;
    }
    None
}

/// Splits the fragment starting at `open` into tag, inner content, and end
/// offset, counting nested `<div>`s so wrapped content stays intact.
fn split_fragment(raw: &str, open: usize) -> Result<Fragment<'_>, MarkupError> {
    let tag_end = raw[open..].find('>').ok_or(MarkupError::Unterminated)? + open;
    let tag = &raw[open..tag_end];
    let inner_start = tag_end + 1;

    let mut depth = 1usize;
    let mut at = inner_start;
    while depth > 0 {
        let next_open = find_div_open(raw, at);
        let next_close = raw[at..].find("</div>").map(|rel| at + rel);
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                at = o + 4;
            }
            (_, Some(c)) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Fragment {
                        tag,
                        inner: &raw[inner_start..c],
                        end: c + "</div>".len(),
                    });
                }
                at = c + "</div>".len();
            }
            _ => return Err(MarkupError::Unterminated),
        }
    }
    Err(MarkupError::Unterminated)
}

/// Next `<div` that actually opens a tag (followed by whitespace or `>`).
fn find_div_open(raw: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(rel) = raw[at..].find("<div") {
        let open = at + rel;
        match raw.as_bytes().get(open + 4) {
            Some(b' ') | Some(b'>') | Some(b'\t') | Some(b'\n') => return Some(open),
            _ => at = open + 4,
        }
    }
    None
}

fn parse_fragment(
    tag: &str,
    inner: &str,
    seen: &mut BTreeSet<BlockId>,
) -> Result<Block, MarkupError> {
    let raw_id = attr_value(tag, "data-block-id").ok_or(MarkupError::MissingId)?;
    if raw_id.is_empty() {
        return Err(MarkupError::MissingId);
    }

    // malformed or missing metadata degrades to an empty object
    let mut meta = attr_value(tag, "data-block-json")
        .map(unescape_attr)
        .and_then(|json| serde_json::from_str::<Value>(&json).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let style = attr_value(tag, "style").unwrap_or("");
    let x = style_px(style, "left")
        .or_else(|| meta.get("left").and_then(Value::as_i64))
        .unwrap_or(FALLBACK_COORD);
    let y = style_px(style, "top")
        .or_else(|| meta.get("top").and_then(Value::as_i64))
        .unwrap_or(FALLBACK_COORD);

    let width = meta.get("width").and_then(dimension_from_value);
    let height = meta.get("height").and_then(dimension_from_value);

    let mut content = if inner.is_empty() {
        meta.get("html")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    } else {
        inner.to_string()
    };

    // the embedded layout keys were merged in by serialization; strip them so
    // metadata round-trips to exactly what the caller supplied
    for key in ["left", "top", "width", "height", "html"] {
        meta.remove(key);
    }

    let id = BlockId::new(raw_id);
    let id = if seen.contains(&id) {
        // collision: synthesize a fresh id and keep the original one in the
        // content for traceability
        content.push_str(&format!("<!-- data-block-id=\"{raw_id}\" -->"));
        BlockId::generate()
    } else {
        id
    };
    seen.insert(id.clone());

    Ok(Block {
        id,
        content,
        position: Position::new(x, y),
        width,
        height,
        metadata: meta.into_iter().collect::<Metadata>(),
        last_local_edit_at: None,
    })
}

fn dimension_value(dim: Dimension) -> Value {
    match dim {
        Dimension::Px(px) => Value::from(px),
        Dimension::Percent(pct) => Value::from(format!("{pct}%")),
    }
}

fn dimension_from_value(value: &Value) -> Option<Dimension> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .map(Dimension::Px),
        Value::String(s) => Dimension::parse(s),
        _ => None,
    }
}

/// Extracts an attribute value delimited by single or double quotes.
fn attr_value<'a>(haystack: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=");
    let mut at = 0;
    while let Some(rel) = haystack[at..].find(&needle) {
        let start = at + rel;
        // reject suffix matches like data-block-id when looking for id
        if start > 0 {
            let prev = haystack.as_bytes()[start - 1];
            if !(prev == b' ' || prev == b'\t' || prev == b'\n') {
                at = start + needle.len();
                continue;
            }
        }
        let value_start = start + needle.len();
        let quote = haystack.as_bytes().get(value_start).copied();
        if quote != Some(b'"') && quote != Some(b'\'') {
            at = value_start;
            continue;
        }
        let quote = quote.unwrap_or(b'"') as char;
        let body = &haystack[value_start + 1..];
        return body.find(quote).map(|end| &body[..end]);
    }
    None
}

/// Reads `left: 40px` style coordinates, rounding fractional values.
fn style_px(style: &str, name: &str) -> Option<i64> {
    let needle = format!("{name}:");
    let start = style.find(&needle)? + needle.len();
    let rest = style[start..].trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok().map(|v| v.round() as i64)
}

fn escape_attr(json: &str) -> String {
    json.replace('<', "&lt;").replace('\'', "&#39;")
}

fn unescape_attr(raw: &str) -> String {
    raw.replace("&#39;", "'").replace("&lt;", "<")
}
