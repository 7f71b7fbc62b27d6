//! Bounded pagination and date-range filters for list operations.

use crate::{
    config::settings::ListingSettings,
    core::eligibility::parse_calendar_date,
    errors::{Error, Result},
};
use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::Serialize;

/// A resolved, clamped page request (1-based page number)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u64,
    /// Rows per page
    pub limit: u64,
}

impl PageRequest {
    /// Applies defaults and clamps `limit` to `1..=max_page_size`.
    ///
    /// A page whose row offset does not fit a signed 64-bit SQL `OFFSET` is rejected.
    pub fn resolve(page: Option<u64>, limit: Option<u64>, listing: ListingSettings) -> Result<Self> {
        let max = listing.max_page_size.max(1);
        let request = Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(listing.default_page_size).clamp(1, max),
        };
        let offset = request.index().checked_mul(request.limit);
        match offset.and_then(|o| i64::try_from(o).ok()) {
            Some(_) => Ok(request),
            None => Err(Error::validation(format!(
                "page {} is out of range",
                request.page
            ))),
        }
    }

    /// Zero-based page index as expected by `Paginator::fetch_page`
    #[must_use]
    pub const fn index(self) -> u64 {
        self.page - 1
    }
}

/// Page metadata returned alongside the rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    /// Rows matching the filters
    pub total: u64,
    /// 1-based page number
    pub page: u64,
    /// Rows per page
    pub limit: u64,
    /// Number of pages at this limit
    pub pages: u64,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Paging metadata
    pub meta: PageMeta,
    /// Rows of this page
    pub data: Vec<T>,
}

impl<T> Page<T> {
    /// Wraps `data` with the metadata for `request` out of `total` rows.
    #[must_use]
    pub fn new(request: PageRequest, total: u64, data: Vec<T>) -> Self {
        Self {
            meta: PageMeta {
                total,
                page: request.page,
                limit: request.limit,
                pages: total.div_ceil(request.limit),
            },
            data,
        }
    }
}

/// Inclusive calendar-date range, converted to half-open UTC instants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Midnight of the `from` date
    pub start: Option<DateTime<Utc>>,
    /// Midnight of the day after the `to` date
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Parses optional `from`/`to` dates; blank values mean "unbounded".
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        let bound = |field: &'static str, raw: Option<&str>| {
            raw.map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| parse_calendar_date(field, v))
                .transpose()
        };
        let start = bound("from", from)?.map(|d| d.and_time(NaiveTime::default()).and_utc());
        let end = bound("to", to)?
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| d.and_time(NaiveTime::default()).and_utc());
        Ok(Self { start, end })
    }
}
