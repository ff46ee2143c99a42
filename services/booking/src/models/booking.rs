//! Booking lifecycle models
//!
//! A booking moves through a closed state machine:
//!
//! ```text
//! pending --approve--> approved --return--> returned
//! pending --reject---> rejected
//! pending --cancel---> (row deleted)
//! ```
//!
//! `overdue` is reserved in the schema but has no writer; keeping the
//! variant closed means any future writer forces every transition site to
//! be revisited.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fee charged per started day past the agreed return date, in whole
/// currency units
pub const DAILY_OVERDUE_FEE: i64 = 1;

const SECONDS_PER_DAY: i64 = 86_400;

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
    Overdue,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Returned => "returned",
            BookingStatus::Overdue => "overdue",
        }
    }

    /// Whether the booking still lays claim to its book
    pub fn is_active(&self) -> bool {
        match self {
            BookingStatus::Pending | BookingStatus::Approved => true,
            BookingStatus::Rejected | BookingStatus::Returned | BookingStatus::Overdue => false,
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            "returned" => Ok(BookingStatus::Returned),
            "overdue" => Ok(BookingStatus::Overdue),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking entity
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: BookingStatus,
    pub borrow_date: DateTime<Utc>,
    pub return_date: DateTime<Utc>,
    pub actual_return_date: Option<DateTime<Utc>>,
    pub overdue_fee: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New booking payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub book_id: Uuid,
    pub borrow_date: DateTime<Utc>,
    pub return_date: DateTime<Utc>,
}

/// Request body for returning a booking
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReturnRequest {
    /// Defaults to the current time when omitted
    pub actual_return_date: Option<DateTime<Utc>>,
}

/// Query parameters for booking listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingQuery {
    /// Filter by holder
    pub user_id: Option<Uuid>,
    /// Filter by book
    pub book_id: Option<Uuid>,
    /// Filter by status
    pub status: Option<BookingStatus>,
    /// Case-insensitive substring over user name/email and book title/author
    pub search: Option<String>,
    /// Page number (1-based)
    pub page: Option<u32>,
    /// Number of items per page
    pub limit: Option<u32>,
}

impl BookingQuery {
    /// Clamp pagination inputs: page >= 1, limit in 1..=100
    pub fn pagination(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(10).clamp(1, 100);
        (page, limit)
    }
}

/// Booking joined with holder and book context, for listings
#[derive(Debug, Clone, Serialize)]
pub struct BookingListItem {
    #[serde(flatten)]
    pub booking: Booking,
    pub user_name: String,
    pub user_email: String,
    pub book_title: String,
    pub book_author: String,
}

/// Response for booking listing with pagination
#[derive(Debug, Clone, Serialize)]
pub struct BookingListResponse {
    pub items: Vec<BookingListItem>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// Compute the overdue fee owed at return time
///
/// Zero when the book comes back on time; otherwise one daily fee per
/// started day past the agreed return date.
pub fn overdue_fee(return_date: DateTime<Utc>, actual_return_date: DateTime<Utc>) -> i64 {
    let late = actual_return_date.signed_duration_since(return_date);
    if late <= Duration::zero() {
        return 0;
    }

    let late_seconds = late.num_seconds();
    let late_days = (late_seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
    DAILY_OVERDUE_FEE * late_days.max(1)
}

/// Number of pages needed for `total` rows at `limit` per page
pub fn total_pages(total: i64, limit: u32) -> i64 {
    let limit = i64::from(limit.max(1));
    (total + limit - 1) / limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Approved,
            BookingStatus::Rejected,
            BookingStatus::Returned,
            BookingStatus::Overdue,
        ] {
            assert_eq!(BookingStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(BookingStatus::from_str("cancelled").is_err());
    }

    #[test]
    fn test_active_statuses() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Approved.is_active());
        assert!(!BookingStatus::Rejected.is_active());
        assert!(!BookingStatus::Returned.is_active());
        assert!(!BookingStatus::Overdue.is_active());
    }

    #[test]
    fn test_no_fee_when_returned_on_time() {
        let due = date(2024, 1, 15);
        assert_eq!(overdue_fee(due, date(2024, 1, 10)), 0);
        assert_eq!(overdue_fee(due, due), 0);
    }

    #[test]
    fn test_fee_counts_whole_days() {
        let due = date(2024, 1, 15);
        assert_eq!(overdue_fee(due, date(2024, 1, 16)), 1);
        assert_eq!(overdue_fee(due, date(2024, 1, 20)), 5);
    }

    #[test]
    fn test_partial_day_counts_as_full_day() {
        let due = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let one_minute_late = Utc.with_ymd_and_hms(2024, 1, 15, 12, 1, 0).unwrap();
        assert_eq!(overdue_fee(due, one_minute_late), 1);

        let one_day_one_minute = Utc.with_ymd_and_hms(2024, 1, 16, 12, 1, 0).unwrap();
        assert_eq!(overdue_fee(due, one_day_one_minute), 2);
    }

    #[test]
    fn test_fee_grows_by_one_unit_per_day() {
        let due = date(2024, 1, 15);
        let mut previous = 0;
        for day in 16..=25 {
            let fee = overdue_fee(due, date(2024, 1, day));
            assert_eq!(fee, previous + DAILY_OVERDUE_FEE);
            previous = fee;
        }
    }

    #[test]
    fn test_pagination_clamping() {
        let defaults = BookingQuery::default();
        assert_eq!(defaults.pagination(), (1, 10));

        let out_of_range = BookingQuery {
            page: Some(0),
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(out_of_range.pagination(), (1, 100));
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[test]
    fn test_status_query_param_parses_lowercase() {
        let query: BookingQuery =
            serde_json::from_str(r#"{"status": "approved", "page": 2}"#).unwrap();
        assert_eq!(query.status, Some(BookingStatus::Approved));
        assert_eq!(query.page, Some(2));
    }
}
