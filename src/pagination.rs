//! Pagination: page requests, row windows, cursors and record streams.
//!
//! A page is a window of the query's ordered rows, anchored at either end.
//! Start-anchored windows fetch one extra row past the page to learn whether
//! more rows follow; end-anchored windows are fetched in inverted order and
//! reversed.

use std::collections::VecDeque;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{Row, Transport};
use crate::error::{RelqError, RelqResult};
use crate::query::{Query, Sort};

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u64 = 1000;
/// Largest offset accepted in an explicit [`PageRequest::Offset`].
///
/// Cursor navigation and record streams are not bound by it.
pub const MAX_OFFSET: u64 = 49_000;
/// Largest offset any window may carry; offsets are bound as `int8`.
pub const MAX_WINDOW_OFFSET: u64 = i64::MAX as u64;

const CURSOR_VERSION: u8 = 1;

/// How to pick the page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// `size` rows starting at `offset`.
    Offset { size: u64, offset: u64 },
    /// The page following the cursor's page.
    After { cursor: String, size: Option<u64> },
    /// The page preceding the cursor's page.
    Before { cursor: String, size: Option<u64> },
    /// The first page of the cursor's query.
    First { cursor: String, size: Option<u64> },
    /// The last page of the cursor's query.
    Last { cursor: String, size: Option<u64> },
    /// The last `size` rows of a fresh query.
    LastOf { size: u64 },
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::Offset {
            size: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl PageRequest {
    pub fn after(cursor: impl Into<String>) -> Self {
        Self::After {
            cursor: cursor.into(),
            size: None,
        }
    }

    pub fn before(cursor: impl Into<String>) -> Self {
        Self::Before {
            cursor: cursor.into(),
            size: None,
        }
    }
}

/// Which end of the ordered rows a window counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Start,
    End,
}

/// `size` rows, `offset` rows away from `anchor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub anchor: Anchor,
    pub offset: u64,
    pub size: u64,
}

impl Window {
    pub fn start(offset: u64, size: u64) -> Self {
        Self {
            anchor: Anchor::Start,
            offset,
            size,
        }
    }

    pub fn end(offset: u64, size: u64) -> Self {
        Self {
            anchor: Anchor::End,
            offset,
            size,
        }
    }

    pub fn validate(&self) -> RelqResult<()> {
        self.check().map_err(RelqError::InvalidPagination)
    }

    fn check(&self) -> Result<(), String> {
        if self.size == 0 || self.size > MAX_PAGE_SIZE {
            return Err(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.size
            ));
        }
        if self.offset > MAX_WINDOW_OFFSET {
            return Err(format!("offset {} is out of range", self.offset));
        }
        Ok(())
    }

    /// Window of up to `size` rows right after this one; `None` past the end.
    pub fn after(&self, size: u64) -> Option<Window> {
        match self.anchor {
            Anchor::Start => Some(Window::start(self.offset.saturating_add(self.size), size)),
            Anchor::End if self.offset == 0 => None,
            Anchor::End => Some(Window::end(
                self.offset.saturating_sub(size),
                size.min(self.offset),
            )),
        }
    }

    /// Window of up to `size` rows right before this one; `None` at the start.
    pub fn before(&self, size: u64) -> Option<Window> {
        match self.anchor {
            Anchor::Start if self.offset == 0 => None,
            Anchor::Start => Some(Window::start(
                self.offset.saturating_sub(size),
                size.min(self.offset),
            )),
            Anchor::End => Some(Window::end(self.offset.saturating_add(self.size), size)),
        }
    }
}

/// Decoded cursor token: everything needed to replay a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "v")]
    version: u8,
    pub table: String,
    pub filter: Value,
    pub sort: Vec<Sort>,
    pub columns: Option<Vec<String>>,
    pub window: Window,
}

impl Cursor {
    pub fn new(
        table: &str,
        filter: Value,
        sort: Vec<Sort>,
        columns: Option<Vec<String>>,
        window: Window,
    ) -> Self {
        Self {
            version: CURSOR_VERSION,
            table: table.to_string(),
            filter,
            sort,
            columns,
            window,
        }
    }

    /// Opaque URL-safe token.
    pub fn encode(&self) -> RelqResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> RelqResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| RelqError::InvalidCursor(e.to_string()))?;
        let cursor: Cursor =
            serde_json::from_slice(&bytes).map_err(|e| RelqError::InvalidCursor(e.to_string()))?;
        if cursor.version != CURSOR_VERSION {
            return Err(RelqError::InvalidCursor(format!(
                "unsupported cursor version {}",
                cursor.version
            )));
        }
        cursor.window.check().map_err(RelqError::InvalidCursor)?;
        Ok(cursor)
    }
}

/// Pagination metadata returned with every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub cursor: String,
    pub more: bool,
}

/// One page of records plus the query that produced it.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<Row>,
    pub meta: PageMeta,
    pub(crate) query: Query,
    pub(crate) window: Window,
}

impl Page {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Whether rows follow this page.
    pub fn has_next_page(&self) -> bool {
        self.meta.more
    }

    pub async fn next_page(&self, transport: &dyn Transport, size: Option<u64>) -> RelqResult<Page> {
        self.navigate(
            transport,
            PageRequest::After {
                cursor: self.meta.cursor.clone(),
                size,
            },
        )
        .await
    }

    pub async fn previous_page(&self, transport: &dyn Transport, size: Option<u64>) -> RelqResult<Page> {
        self.navigate(
            transport,
            PageRequest::Before {
                cursor: self.meta.cursor.clone(),
                size,
            },
        )
        .await
    }

    pub async fn first_page(&self, transport: &dyn Transport, size: Option<u64>) -> RelqResult<Page> {
        self.navigate(
            transport,
            PageRequest::First {
                cursor: self.meta.cursor.clone(),
                size,
            },
        )
        .await
    }

    pub async fn last_page(&self, transport: &dyn Transport, size: Option<u64>) -> RelqResult<Page> {
        self.navigate(
            transport,
            PageRequest::Last {
                cursor: self.meta.cursor.clone(),
                size,
            },
        )
        .await
    }

    async fn navigate(&self, transport: &dyn Transport, request: PageRequest) -> RelqResult<Page> {
        self.query.get_paginated(transport, request).await
    }
}

/// Lazy sequence of records, fetched one page per round trip.
///
/// Dropping the stream cancels nothing beyond the in-flight future. A failed
/// fetch keeps its position so `next` can be retried.
pub struct RecordStream<'t> {
    transport: &'t dyn Transport,
    pending: Option<(Query, Window)>,
    buffer: VecDeque<Row>,
}

impl<'t> RecordStream<'t> {
    pub(crate) fn new(transport: &'t dyn Transport, query: Query, window: Window) -> Self {
        Self {
            transport,
            pending: Some((query, window)),
            buffer: VecDeque::new(),
        }
    }

    /// Window of the next page to fetch, `None` once exhausted.
    pub fn position(&self) -> Option<Window> {
        self.pending.as_ref().map(|(_, w)| *w)
    }

    pub async fn next(&mut self) -> RelqResult<Option<Row>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            let Some((query, window)) = self.pending.take() else {
                return Ok(None);
            };

            let page = match query.fetch_window(self.transport, window).await {
                Ok(page) => page,
                Err(e) => {
                    self.pending = Some((query, window));
                    return Err(e);
                }
            };
            if page.meta.more {
                self.pending = window.after(window.size).map(|w| (page.query.clone(), w));
            }
            self.buffer.extend(page.records);
        }
    }

    /// Adapt into a [`Stream`] that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = RelqResult<Row>> + 't {
        futures::stream::unfold(self, |mut records| async move {
            match records.next().await {
                Ok(Some(row)) => Some((Ok(row), records)),
                Ok(None) => None,
                Err(e) => {
                    records.pending = None;
                    records.buffer.clear();
                    Some((Err(e), records))
                }
            }
        })
    }
}
