use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    #[serde(default = "default_page_size")]
    pub limit: usize,
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

pub fn decode_cursor(cursor: &Option<String>) -> Option<String> {
    cursor
        .as_ref()
        .and_then(|c| URL_SAFE_NO_PAD.decode(c).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

pub fn encode_cursor(last_seen_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(last_seen_id.as_bytes())
}

/// Applies a cursor-based page over `items` already sorted by their
/// ordering key. The cursor is an opaque base64url encoding of the
/// last-seen ordering key.
pub fn paginate<T: Clone>(mut items: Vec<T>, key: impl Fn(&T) -> String, query: &PageQuery) -> Page<T> {
    items.sort_by_key(&key);
    let start = match decode_cursor(&query.cursor) {
        Some(after) => items.iter().position(|item| key(item) > after).unwrap_or(items.len()),
        None => 0,
    };
    let end = (start + query.limit).min(items.len());
    let page_items: Vec<T> = items[start..end].to_vec();
    let next_cursor = if end < items.len() {
        page_items.last().map(|item| encode_cursor(&key(item)))
    } else {
        None
    };
    Page {
        items: page_items,
        next_cursor,
    }
}
