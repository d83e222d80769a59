//! Integration tests for cursor pagination.

use async_trait::async_trait;
use batchql_runtime::{
    paginate, Connection, ConnectionOptions, LoadError, OrderedSource, PageArgs,
    PaginationArgumentError, PaginationError,
};
use std::sync::Mutex;

fn twenty() -> Vec<u32> {
    (0..20).collect()
}

fn page(args: PageArgs) -> Connection<u32> {
    Connection::from_slice(&twenty(), &args, ConnectionOptions::default()).unwrap()
}

/// Test the `before` bound.
#[test]
fn test_before_ten() {
    let conn = page(PageArgs::new().before(10));
    assert_eq!(conn.items, (0..10).collect::<Vec<_>>());
    assert!(conn.page_info.has_next_page);
    assert!(!conn.page_info.has_previous_page);
}

/// Test the `after` bound with total count.
#[test]
fn test_after_nine() {
    let conn = page(PageArgs::new().after(9));
    assert_eq!(conn.items, (10..20).collect::<Vec<_>>());
    assert!(conn.page_info.has_previous_page);
    assert!(!conn.page_info.has_next_page);
    assert_eq!(conn.total_count, Some(20));
}

/// Test the `first` bound.
#[test]
fn test_first_ten() {
    let conn = page(PageArgs::new().first(10));
    assert_eq!(conn.items, (0..10).collect::<Vec<_>>());
    assert!(conn.page_info.has_next_page);
    assert!(!conn.page_info.has_previous_page);
    assert_eq!(conn.page_info.start_cursor.as_deref(), Some("0"));
    assert_eq!(conn.page_info.end_cursor.as_deref(), Some("9"));
}

/// Test that `first = 0` reports the boundary cursor.
#[test]
fn test_first_zero() {
    let conn = page(PageArgs::new().first(0));
    assert!(conn.items.is_empty());
    assert!(conn.page_info.has_next_page);
    assert_eq!(conn.page_info.start_cursor.as_deref(), Some("0"));
    assert_eq!(conn.page_info.end_cursor.as_deref(), Some("0"));
}

/// Test that `before = 0` is an empty page with no cursors.
#[test]
fn test_before_zero() {
    let conn = page(PageArgs::new().before(0));
    assert!(conn.items.is_empty());
    assert!(!conn.page_info.has_next_page);
    assert!(!conn.page_info.has_previous_page);
    assert_eq!(conn.page_info.start_cursor, None);
    assert_eq!(conn.page_info.end_cursor, None);
}

/// Test combined bounds.
#[test]
fn test_after_before_first() {
    let conn = page(PageArgs::new().after(4).before(15).first(5));
    assert_eq!(conn.items, vec![5, 6, 7, 8, 9]);
    assert!(conn.page_info.has_previous_page);
    assert!(conn.page_info.has_next_page);
}

/// Test argument validation.
#[test]
fn test_invalid_arguments() {
    let err = Connection::from_slice(&twenty(), &PageArgs::new().first(-1), Default::default())
        .unwrap_err();
    assert_eq!(err, PaginationArgumentError::NegativeFirst(-1));
    let err = Connection::from_slice(
        &twenty(),
        &PageArgs::new().first(1).last(1),
        Default::default(),
    )
    .unwrap_err();
    assert_eq!(err, PaginationArgumentError::FirstAndLast);
}

/// Test the camelCase JSON surface.
#[test]
fn test_connection_json() {
    let conn = page(PageArgs::new().last(2));
    let json = serde_json::to_value(&conn).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "items": [18, 19],
            "pageInfo": {
                "hasPreviousPage": true,
                "hasNextPage": false,
                "startCursor": "18",
                "endCursor": "19"
            },
            "totalCount": 20
        })
    );
}

/// A source that records which ranges were materialized.
struct RecordingSource {
    rows: Vec<String>,
    ranges: Mutex<Vec<(usize, usize)>>,
}

#[async_trait]
impl OrderedSource for RecordingSource {
    type Item = String;

    async fn count(&self) -> Result<usize, LoadError> {
        Ok(self.rows.len())
    }

    async fn range(&self, offset: usize, len: usize) -> Result<Vec<String>, LoadError> {
        self.ranges.lock().unwrap().push((offset, len));
        Ok(self.rows[offset..offset + len].to_vec())
    }
}

/// Test that only the selected window is materialized.
#[tokio::test]
async fn test_source_materializes_only_window() {
    let source = RecordingSource {
        rows: (0..100).map(|i| format!("row{i}")).collect(),
        ranges: Mutex::new(Vec::new()),
    };

    let conn = paginate(&source, &PageArgs::new().after(49).first(3), ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(conn.items, vec!["row50", "row51", "row52"]);
    let cursors: Vec<_> = conn.edges().into_iter().map(|e| e.cursor).collect();
    assert_eq!(cursors, vec!["50", "51", "52"]);

    let empty = paginate(&source, &PageArgs::new().before(0), ConnectionOptions::default())
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert_eq!(*source.ranges.lock().unwrap(), vec![(50, 3)]);
}

struct FailingSource;

#[async_trait]
impl OrderedSource for FailingSource {
    type Item = u32;

    async fn count(&self) -> Result<usize, LoadError> {
        Err("count query failed".into())
    }

    async fn range(&self, _offset: usize, _len: usize) -> Result<Vec<u32>, LoadError> {
        Ok(Vec::new())
    }
}

/// Test that source failures and argument errors stay distinct.
#[tokio::test]
async fn test_paginate_errors() {
    let err = paginate(&FailingSource, &PageArgs::new(), ConnectionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PaginationError::Source(_)));

    let err = paginate(&FailingSource, &PageArgs::new().last(-3), ConnectionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaginationError::Argument(PaginationArgumentError::NegativeLast(-3))
    ));
}
