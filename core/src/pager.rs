//! Cursor pagination over collection endpoints.
//!
//! # Design
//! A collection page carries its items under a resource-specific key
//! (`volumes`, `hosts`, ...) next to `first`, `next`, `limit` and
//! `total_count`. The only state carried from one page to the next is the
//! `start` query parameter of `next.href`; the cursor is opaque and is
//! copied verbatim.
//!
//! `Pager` is a small state machine: `Fresh` until the first fetch,
//! `HasMore(cursor)` while pages keep a `next` link, `Exhausted` after a
//! page without one. A failed fetch leaves the state untouched, so calling
//! `get_next` again retries the same page. A `next` link without a `start`
//! parameter, or one repeating the cursor that was just sent, is treated as
//! the end of the collection.
//!
//! A pager is single-owner: it is driven through `&mut self` and holds no
//! locks. Paginate the same resource concurrently with separate pagers.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::decode;
use crate::error::ApiError;
use crate::http::HttpResponse;

/// Query parameter carrying the cursor.
pub const START_PARAM: &str = "start";

/// A link to a page of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageLink {
    pub href: String,
}

/// One page of a collection endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    pub items: Vec<T>,
    pub first: PageLink,
    pub next: Option<PageLink>,
    pub limit: i64,
    pub total_count: i64,
}

#[derive(Deserialize)]
struct Envelope {
    first: PageLink,
    #[serde(default)]
    next: Option<PageLink>,
    #[serde(default)]
    limit: i64,
    #[serde(default)]
    total_count: i64,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl<T: DeserializeOwned> Collection<T> {
    /// Decode a collection whose items live under `items_key`.
    ///
    /// A missing (or `null`) items array decodes as an empty page; a
    /// missing `first` link or an empty body is a decode error.
    pub fn from_response(
        operation: &'static str,
        items_key: &str,
        response: &HttpResponse,
    ) -> Result<Self, ApiError> {
        let envelope: Envelope = decode::parse(operation, response)?
            .ok_or_else(|| ApiError::decode(operation, "empty body where a collection was expected"))?;
        Self::from_envelope(operation, items_key, envelope)
    }

    fn from_envelope(
        operation: &'static str,
        items_key: &str,
        mut envelope: Envelope,
    ) -> Result<Self, ApiError> {
        let items = match envelope.rest.remove(items_key) {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw)
                .map_err(|e| ApiError::decode(operation, format!("{items_key}: {e}")))?,
        };
        Ok(Collection {
            items,
            first: envelope.first,
            next: envelope.next,
            limit: envelope.limit,
            total_count: envelope.total_count,
        })
    }
}

impl<T> Collection<T> {
    /// Cursor for the following page, or `None` when this is the last page.
    pub fn next_cursor(&self, operation: &'static str) -> Result<Option<String>, ApiError> {
        match &self.next {
            None => Ok(None),
            Some(link) => extract_cursor(operation, &link.href),
        }
    }
}

/// Read the `start` query parameter out of an absolute or relative href.
///
/// Returns `Ok(None)` when the parameter is absent or empty.
pub fn extract_cursor(operation: &'static str, href: &str) -> Result<Option<String>, ApiError> {
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse("http://relative.invalid/")
                .map_err(|e| ApiError::decode(operation, e.to_string()))?;
            base.join(href)
                .map_err(|e| ApiError::decode(operation, format!("bad next link '{href}': {e}")))?
        }
        Err(e) => {
            return Err(ApiError::decode(
                operation,
                format!("bad next link '{href}': {e}"),
            ))
        }
    };
    Ok(url
        .query_pairs()
        .find(|(name, _)| name == START_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty()))
}

/// Something that can fetch one page given an optional cursor.
///
/// The source owns the list options; the pager only supplies `start`.
pub trait PageSource {
    type Item;

    fn operation(&self) -> &'static str;

    fn fetch(&mut self, start: Option<&str>) -> Result<Collection<Self::Item>, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerState {
    Fresh,
    HasMore(String),
    Exhausted,
}

/// Page-metadata of the most recently fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub first: PageLink,
    pub next: Option<PageLink>,
    pub limit: i64,
    pub total_count: i64,
}

pub struct Pager<S: PageSource> {
    source: S,
    state: PagerState,
    last_page: Option<PageInfo>,
    collected: Vec<S::Item>,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: PagerState::Fresh,
            last_page: None,
            collected: Vec::new(),
        }
    }

    pub fn state(&self) -> &PagerState {
        &self.state
    }

    /// `true` until a page without a usable `next` link has been fetched.
    pub fn has_next(&self) -> bool {
        self.state != PagerState::Exhausted
    }

    pub fn last_page(&self) -> Option<&PageInfo> {
        self.last_page.as_ref()
    }

    pub fn total_count(&self) -> Option<i64> {
        self.last_page.as_ref().map(|p| p.total_count)
    }

    pub fn limit(&self) -> Option<i64> {
        self.last_page.as_ref().map(|p| p.limit)
    }

    /// Fetch the next page and return its items.
    ///
    /// Once exhausted this returns an empty `Vec` without calling the source.
    pub fn get_next(&mut self) -> Result<Vec<S::Item>, ApiError> {
        let operation = self.source.operation();
        let start = match &self.state {
            PagerState::Exhausted => return Ok(Vec::new()),
            PagerState::Fresh => None,
            PagerState::HasMore(cursor) => Some(cursor.as_str()),
        };

        let page = self.source.fetch(start)?;
        let mut cursor = page.next_cursor(operation)?;
        if page.next.is_some() && cursor.is_none() {
            warn!(
                operation,
                href = page.next.as_ref().map(|l| l.href.as_str()),
                "next link has no start cursor; treating collection as exhausted"
            );
        }
        if cursor.is_some() && cursor.as_deref() == start {
            warn!(
                operation,
                cursor = start,
                "next link repeats the current cursor; treating collection as exhausted"
            );
            cursor = None;
        }

        self.state = match cursor {
            Some(cursor) => PagerState::HasMore(cursor),
            None => PagerState::Exhausted,
        };
        debug!(operation, items = page.items.len(), state = ?self.state, "fetched page");

        self.last_page = Some(PageInfo {
            first: page.first,
            next: page.next,
            limit: page.limit,
            total_count: page.total_count,
        });
        Ok(page.items)
    }

    /// Fetch every remaining page and return all items in arrival order.
    ///
    /// Stops at the first error. Items gathered before the error stay in the
    /// pager (see [`take_collected`](Self::take_collected)); calling
    /// `get_all` again resumes from the page that failed.
    pub fn get_all(&mut self) -> Result<Vec<S::Item>, ApiError> {
        while self.has_next() {
            let items = self.get_next()?;
            self.collected.extend(items);
        }
        Ok(std::mem::take(&mut self.collected))
    }

    /// Items accumulated by an interrupted `get_all`.
    pub fn take_collected(&mut self) -> Vec<S::Item> {
        std::mem::take(&mut self.collected)
    }

    pub fn into_source(self) -> S {
        self.source
    }
}
