//! Cursor pagination shared by the list operations.

use crate::error::{MetadataError, MetadataResult};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

/// Default and maximum page sizes.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Opaque position in an ordered listing. Wraps the sort key of the last item returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn after(sort_key: impl Into<String>) -> Self {
        Self(sort_key.into())
    }

    pub fn sort_key(&self) -> &str {
        &self.0
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn decode(s: &str) -> MetadataResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| MetadataError::InvalidCursor(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Self)
            .map_err(|e| MetadataError::InvalidCursor(e.to_string()))
    }

    /// Sort key as a version number, for history listings.
    pub fn as_version(&self) -> MetadataResult<i64> {
        self.0
            .parse()
            .map_err(|_| MetadataError::InvalidCursor(format!("not a version: {}", self.0)))
    }
}

/// One page of results and the cursor for the next, if any.
#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with `limit + 1`, using the extra row as the "more" signal.
    pub fn from_overfetch(mut rows: Vec<T>, limit: u32, sort_key: impl Fn(&T) -> String) -> Self {
        let limit = limit as usize;
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|last| Cursor::after(sort_key(last)).encode())
        } else {
            None
        };
        Self {
            items: rows,
            next_cursor,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}
