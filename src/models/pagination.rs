use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Upper bound on pages fetched by [`collect_all_pages`].
pub const MAX_PAGES: usize = 10_000;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Position in a `(created_at, seq)` ordered listing. `seq` is the storage
/// insertion counter, so rows written at the same instant keep the order
/// they were booked in. Opaque to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub time: DateTime<Utc>,
    pub seq: i64,
}

impl Cursor {
    pub fn new(time: DateTime<Utc>, seq: i64) -> Self {
        Self { time, seq }
    }

    pub fn encode(&self) -> String {
        hex::encode(format!("{}|{}", self.time.to_rfc3339(), self.seq))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let invalid = || AppError::Validation(format!("Invalid cursor '{}'", encoded));

        let bytes = hex::decode(encoded).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (time, seq) = raw.split_once('|').ok_or_else(invalid)?;

        let time = DateTime::parse_from_rfc3339(time)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        let seq = seq.parse::<i64>().map_err(|_| invalid())?;

        Ok(Self { time, seq })
    }

    /// True when a row at `(time, seq)` sorts strictly after this cursor.
    pub fn precedes(&self, time: DateTime<Utc>, seq: i64) -> bool {
        (time, seq) > (self.time, self.seq)
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Cursor::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Cursor plus page size for a listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub cursor: Option<Cursor>,
    pub limit: u32,
}

impl PageParams {
    pub fn first(limit: u32) -> Self {
        Self { cursor: None, limit }
    }

    pub fn after(cursor: Cursor, limit: u32) -> Self {
        Self {
            cursor: Some(cursor),
            limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(AppError::Validation("Page limit must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Builds a page from up to `limit + 1` rows fetched in order. The extra
    /// row only signals that another page exists.
    pub fn from_overfetch(mut rows: Vec<T>, limit: u32, cursor_of: impl Fn(&T) -> Cursor) -> Self {
        let limit = limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = if has_more { rows.last().map(&cursor_of) } else { None };

        Self {
            items: rows,
            next_cursor,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Follows `next_cursor` until exhausted, refusing to go past `max_pages`.
pub async fn collect_all_pages<T, F, Fut>(max_pages: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor = None;

    for _ in 0..max_pages {
        let page = fetch(cursor).await?;
        items.extend(page.items);

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }

    Err(AppError::Internal(anyhow::anyhow!(
        "Pagination exceeded {} pages",
        max_pages
    )))
}
