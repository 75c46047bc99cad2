//! Paged result envelopes.
//!
//! # Invariants
//! - `PageResult`: `items.len() <= page_size` and `total >= items.len()`.
//! - Cursor tokens are opaque to callers; only this module interprets them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

/// One offset-based page plus navigation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Exact number of matching records across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> PageResult<T> {
    /// Builds a page; derived fields are computed from `total`, `page` and
    /// `page_size`.
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let size = u64::from(page_size.max(1));
        let total_pages = total.div_ceil(size);
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }

    /// Converts items while keeping page metadata.
    pub fn map<U>(self, mapper: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(mapper).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

/// One keyset page ordered by entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    /// Token for the page after this one, when more records exist.
    pub next_cursor: Option<String>,
    /// The token this page was requested with, re-encoded.
    pub prev_cursor: Option<String>,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Encodes a keyset position into an opaque token.
pub fn encode_cursor(position: &str) -> String {
    URL_SAFE_NO_PAD.encode(position.as_bytes())
}

/// Decodes a token produced by [`encode_cursor`]; `None` when malformed.
pub fn decode_cursor(cursor: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
