//! Cursor pagination over ordered sequences.
//!
//! Cursors are decimal zero-based offsets into the ordered sequence. The
//! window is computed from `before`/`after` bounds first, then truncated by
//! `first` (keeping the head) or `last` (keeping the tail).
//!
//! Bounds outside the sequence are ignored rather than rejected: `after` is
//! honoured for `-1 <= after <= N-1` and `before` for `0 <= before <= N`.
//! An `after` bound that empties the window still reports a previous page,
//! while a `before` bound that empties it reports no next page.

use crate::error::{LoadError, PaginationArgumentError, PaginationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::trace;

/// Pagination bounds as received from a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl PageArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first(mut self, count: i64) -> Self {
        self.first = Some(count);
        self
    }

    pub fn last(mut self, count: i64) -> Self {
        self.last = Some(count);
        self
    }

    pub fn before(mut self, cursor: impl ToString) -> Self {
        self.before = Some(cursor.to_string());
        self
    }

    pub fn after(mut self, cursor: impl ToString) -> Self {
        self.after = Some(cursor.to_string());
        self
    }

    /// Rejects negative counts and `first` together with `last`.
    pub fn validate(&self) -> Result<(), PaginationArgumentError> {
        if let Some(first) = self.first.filter(|n| *n < 0) {
            return Err(PaginationArgumentError::NegativeFirst(first));
        }
        if let Some(last) = self.last.filter(|n| *n < 0) {
            return Err(PaginationArgumentError::NegativeLast(last));
        }
        if self.first.is_some() && self.last.is_some() {
            return Err(PaginationArgumentError::FirstAndLast);
        }
        Ok(())
    }

    /// `before` as an offset. A cursor is a plain decimal integer with an
    /// optional leading `-`; anything else, including `+5` or padded
    /// digits, counts as absent.
    pub fn before_offset(&self) -> Option<i64> {
        parse_cursor(self.before.as_deref())
    }

    pub fn after_offset(&self) -> Option<i64> {
        parse_cursor(self.after.as_deref())
    }
}

fn parse_cursor(cursor: Option<&str>) -> Option<i64> {
    let cursor = cursor?;
    let digits = cursor.strip_prefix('-').unwrap_or(cursor);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    cursor.parse().ok()
}

/// The slice of a sequence selected by [`PageArgs`], without the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub len: usize,
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub start_cursor: Option<usize>,
    pub end_cursor: Option<usize>,
}

impl PageWindow {
    pub fn compute(total: usize, args: &PageArgs) -> Result<Self, PaginationArgumentError> {
        args.validate()?;
        let n = i64::try_from(total).unwrap_or(i64::MAX);

        let after = args.after_offset().filter(|a| (-1..n).contains(a));
        let before = args.before_offset().filter(|b| (0..=n).contains(b));

        // Inclusive bounds; `hi < lo` is an empty window.
        let bounded_lo = after.map_or(0, |a| a + 1);
        let bounded_hi = before.map_or(n - 1, |b| b - 1);
        let (mut lo, mut hi) = (bounded_lo, bounded_hi);

        let mut truncated_tail = false;
        if let Some(first) = args.first {
            if hi - lo + 1 > first {
                hi = lo + first - 1;
                truncated_tail = true;
            }
        }
        let mut truncated_head = false;
        if let Some(last) = args.last {
            if hi - lo + 1 > last {
                lo = hi - last + 1;
                truncated_head = true;
            }
        }

        let unbounded = args.first.is_none() && args.last.is_none();
        let before_cut = before.is_some_and(|b| b < n) && bounded_lo <= bounded_hi;
        let has_next_page = truncated_tail || (unbounded && before_cut);
        let has_previous_page = truncated_head || after.is_some_and(|a| a >= 0);

        let len = (hi - lo + 1).max(0);
        let (start, end) = if len > 0 {
            (Some(lo), Some(hi))
        } else if truncated_tail && args.first == Some(0) {
            (Some(bounded_lo), Some(bounded_lo))
        } else if truncated_head && args.last == Some(0) {
            (Some(bounded_hi), Some(bounded_hi))
        } else {
            (None, None)
        };

        let window = Self {
            offset: if len > 0 { to_index(lo) } else { 0 },
            len: to_index(len),
            has_previous_page,
            has_next_page,
            start_cursor: start.map(to_index),
            end_cursor: end.map(to_index),
        };
        trace!(total, ?window, "computed page window");
        Ok(window)
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn to_index(value: i64) -> usize {
    usize::try_from(value.max(0)).unwrap_or(usize::MAX)
}

/// Which optional parts of a connection to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub total_count: bool,
    pub end_cursor: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            total_count: true,
            end_cursor: true,
        }
    }
}

impl ConnectionOptions {
    pub fn with_total_count(mut self, enabled: bool) -> Self {
        self.total_count = enabled;
        self
    }

    pub fn with_end_cursor(mut self, enabled: bool) -> Self {
        self.end_cursor = enabled;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

/// A page of items with its page info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(skip)]
    first_index: usize,
}

impl<T> Connection<T> {
    fn assemble(items: Vec<T>, window: &PageWindow, total: usize, options: ConnectionOptions) -> Self {
        Self {
            items,
            page_info: PageInfo {
                has_previous_page: window.has_previous_page,
                has_next_page: window.has_next_page,
                start_cursor: window.start_cursor.map(|c| c.to_string()),
                end_cursor: window
                    .end_cursor
                    .filter(|_| options.end_cursor)
                    .map(|c| c.to_string()),
            },
            total_count: options.total_count.then_some(total),
            first_index: window.offset,
        }
    }

    /// Paginates an in-memory slice.
    pub fn from_slice(
        items: &[T],
        args: &PageArgs,
        options: ConnectionOptions,
    ) -> Result<Self, PaginationArgumentError>
    where
        T: Clone,
    {
        let window = PageWindow::compute(items.len(), args)?;
        let page = items[window.range()].to_vec();
        Ok(Self::assemble(page, &window, items.len(), options))
    }

    /// Items paired with their own cursors.
    pub fn edges(&self) -> Vec<Edge<&T>> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, node)| Edge {
                cursor: (self.first_index + i).to_string(),
                node,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A stably ordered sequence that can be counted and materialized by range.
#[async_trait]
pub trait OrderedSource: Send + Sync {
    type Item: Send;

    async fn count(&self) -> Result<usize, LoadError>;

    async fn range(&self, offset: usize, len: usize) -> Result<Vec<Self::Item>, LoadError>;
}

#[async_trait]
impl<T: Clone + Send + Sync> OrderedSource for Vec<T> {
    type Item = T;

    async fn count(&self) -> Result<usize, LoadError> {
        Ok(self.len())
    }

    async fn range(&self, offset: usize, len: usize) -> Result<Vec<T>, LoadError> {
        Ok(self.iter().skip(offset).take(len).cloned().collect())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> OrderedSource for [T] {
    type Item = T;

    async fn count(&self) -> Result<usize, LoadError> {
        Ok(self.len())
    }

    async fn range(&self, offset: usize, len: usize) -> Result<Vec<T>, LoadError> {
        Ok(self.iter().skip(offset).take(len).cloned().collect())
    }
}

/// Paginates an ordered source. Only the selected range is materialized.
pub async fn paginate<S>(
    source: &S,
    args: &PageArgs,
    options: ConnectionOptions,
) -> Result<Connection<S::Item>, PaginationError>
where
    S: OrderedSource + ?Sized,
{
    args.validate()?;
    let total = source.count().await.map_err(PaginationError::Source)?;
    let window = PageWindow::compute(total, args)?;
    let items = if window.is_empty() {
        Vec::new()
    } else {
        source
            .range(window.offset, window.len)
            .await
            .map_err(PaginationError::Source)?
    };
    Ok(Connection::assemble(items, &window, total, options))
}
