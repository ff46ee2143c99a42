//! Booking repository: lifecycle transitions and listings
//!
//! Every transition that touches both a booking row and its book's
//! availability runs inside one transaction with the affected rows locked,
//! so concurrent creates, approvals, and returns serialize on the book row
//! instead of racing.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::booking::{
    Booking, BookingListItem, BookingQuery, BookingStatus, NewBooking, overdue_fee,
};

const BOOKING_COLUMNS: &str = "id, user_id, book_id, status, borrow_date, return_date, \
     actual_return_date, overdue_fee, created_at, updated_at";

const LIST_COLUMNS: &str = "bk.id, bk.user_id, bk.book_id, bk.status, bk.borrow_date, \
     bk.return_date, bk.actual_return_date, bk.overdue_fee, bk.created_at, bk.updated_at, \
     u.name AS user_name, u.email AS user_email, b.title AS book_title, b.author AS book_author";

/// Booking repository
#[derive(Clone)]
pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    /// Create a new booking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending booking for a user
    ///
    /// Availability is not touched here: a pending booking reserves nothing,
    /// approval is the reservation commit point. The book-row lock serializes
    /// concurrent creates for the same book, and the partial unique index on
    /// active claims backstops the duplicate check.
    pub async fn create(&self, user_id: Uuid, new_booking: &NewBooking) -> ApiResult<Booking> {
        if new_booking.return_date <= new_booking.borrow_date {
            return Err(ApiError::Validation(
                "Return date must be after borrow date".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let book = sqlx::query("SELECT is_available FROM books WHERE id = $1 FOR UPDATE")
            .bind(new_booking.book_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(book) = book else {
            return Err(ApiError::NotFound("Book not found".to_string()));
        };

        if !book.get::<bool, _>("is_available") {
            return Err(ApiError::Conflict(
                "Book is not available for booking".to_string(),
            ));
        }

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM bookings
            WHERE user_id = $1 AND book_id = $2 AND status IN ('pending', 'approved')
            "#,
        )
        .bind(user_id)
        .bind(new_booking.book_id)
        .fetch_one(&mut *tx)
        .await?;

        if active > 0 {
            return Err(ApiError::Conflict(
                "You already have a pending or approved booking for this book".to_string(),
            ));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO bookings (user_id, book_id, status, borrow_date, return_date)
            VALUES ($1, $2, 'pending', $3, $4)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(new_booking.book_id)
        .bind(new_booking.borrow_date)
        .bind(new_booking.return_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::Conflict(
                "You already have a pending or approved booking for this book".to_string(),
            ),
            _ => ApiError::Database(e),
        })?;

        tx.commit().await?;

        let booking = map_booking(&row)?;
        info!("Created booking {} for book {}", booking.id, booking.book_id);
        Ok(booking)
    }

    /// Approve a pending booking, reserving the book
    pub async fn approve(&self, id: Uuid) -> ApiResult<Booking> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Approved
            | BookingStatus::Rejected
            | BookingStatus::Returned
            | BookingStatus::Overdue => {
                return Err(ApiError::InvalidState(
                    "Only pending bookings can be approved".to_string(),
                ));
            }
        }

        let book = sqlx::query("SELECT is_available FROM books WHERE id = $1 FOR UPDATE")
            .bind(booking.book_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(book) = book else {
            return Err(ApiError::NotFound("Book not found".to_string()));
        };

        if !book.get::<bool, _>("is_available") {
            return Err(ApiError::Conflict(
                "Book is not available for booking".to_string(),
            ));
        }

        sqlx::query("UPDATE books SET is_available = false, updated_at = NOW() WHERE id = $1")
            .bind(booking.book_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE bookings
            SET status = 'approved', updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Approved booking {}", id);
        map_booking(&row)
    }

    /// Reject a pending booking
    pub async fn reject(&self, id: Uuid) -> ApiResult<Booking> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Approved
            | BookingStatus::Rejected
            | BookingStatus::Returned
            | BookingStatus::Overdue => {
                return Err(ApiError::InvalidState(
                    "Only pending bookings can be rejected".to_string(),
                ));
            }
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE bookings
            SET status = 'rejected', updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        // Recompute instead of blindly freeing: another user may hold the
        // book approved
        sqlx::query(
            r#"
            UPDATE books b
            SET is_available = NOT EXISTS (
                    SELECT 1 FROM bookings
                    WHERE book_id = b.id AND status = 'approved'
                ),
                updated_at = NOW()
            WHERE b.id = $1
            "#,
        )
        .bind(booking.book_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Rejected booking {}", id);
        map_booking(&row)
    }

    /// Return an approved booking, computing the overdue fee
    pub async fn return_booking(
        &self,
        id: Uuid,
        actual_return_date: Option<DateTime<Utc>>,
    ) -> ApiResult<Booking> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        match booking.status {
            BookingStatus::Approved => {}
            BookingStatus::Pending
            | BookingStatus::Rejected
            | BookingStatus::Returned
            | BookingStatus::Overdue => {
                return Err(ApiError::InvalidState(
                    "Only approved bookings can be returned".to_string(),
                ));
            }
        }

        let actual_return_date = actual_return_date.unwrap_or_else(Utc::now);
        let fee = overdue_fee(booking.return_date, actual_return_date);

        let row = sqlx::query(&format!(
            r#"
            UPDATE bookings
            SET status = 'returned', actual_return_date = $2, overdue_fee = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(actual_return_date)
        .bind(fee)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE books SET is_available = true, updated_at = NOW() WHERE id = $1")
            .bind(booking.book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("Returned booking {} (fee: {})", id, fee);
        map_booking(&row)
    }

    /// Cancel a pending booking (hard delete)
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Approved
            | BookingStatus::Rejected
            | BookingStatus::Returned
            | BookingStatus::Overdue => {
                return Err(ApiError::InvalidState(
                    "Only pending bookings can be cancelled".to_string(),
                ));
            }
        }

        sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("Cancelled booking {}", id);
        Ok(())
    }

    /// Find a booking by ID
    pub async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Booking>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_booking).transpose()
    }

    /// List bookings with filters, free-text search, and pagination
    pub async fn list(&self, query: &BookingQuery) -> ApiResult<(Vec<BookingListItem>, i64)> {
        let (page, limit) = query.pagination();
        let offset = i64::from(page - 1) * i64::from(limit);

        let mut builder = QueryBuilder::new(format!(
            r#"
            SELECT {LIST_COLUMNS}
            FROM bookings bk
            JOIN users u ON u.id = bk.user_id
            JOIN books b ON b.id = bk.book_id
            WHERE 1 = 1
            "#
        ));
        push_filters(&mut builder, query);
        builder
            .push(" ORDER BY bk.created_at DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut counter = QueryBuilder::new(
            r#"
            SELECT COUNT(*)
            FROM bookings bk
            JOIN users u ON u.id = bk.user_id
            JOIN books b ON b.id = bk.book_id
            WHERE 1 = 1
            "#,
        );
        push_filters(&mut counter, query);
        let total: i64 = counter.build_query_scalar().fetch_one(&self.pool).await?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(BookingListItem {
                    booking: map_booking(row)?,
                    user_name: row.get("user_name"),
                    user_email: row.get("user_email"),
                    book_title: row.get("book_title"),
                    book_author: row.get("book_author"),
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        Ok((items, total))
    }
}

/// Lock a booking row for the duration of the transaction
async fn lock_booking(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: Uuid,
) -> ApiResult<Booking> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {BOOKING_COLUMNS}
        FROM bookings
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => map_booking(&row),
        None => Err(ApiError::NotFound("Booking not found".to_string())),
    }
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a BookingQuery) {
    if let Some(user_id) = query.user_id {
        builder.push(" AND bk.user_id = ").push_bind(user_id);
    }
    if let Some(book_id) = query.book_id {
        builder.push(" AND bk.book_id = ").push_bind(book_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND bk.status = ").push_bind(status.as_str());
    }
    if let Some(search) = &query.search {
        let search = search.trim();
        if !search.is_empty() {
            let pattern = format!("%{search}%");
            builder
                .push(" AND (u.name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR u.email ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR b.title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR b.author ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

fn map_booking(row: &PgRow) -> ApiResult<Booking> {
    let status: String = row.get("status");
    let status = BookingStatus::from_str(&status).map_err(ApiError::Conversion)?;

    Ok(Booking {
        id: row.get("id"),
        user_id: row.get("user_id"),
        book_id: row.get("book_id"),
        status,
        borrow_date: row.get("borrow_date"),
        return_date: row.get("return_date"),
        actual_return_date: row.get("actual_return_date"),
        overdue_fee: row.get("overdue_fee"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::book::NewBook;
    use crate::repositories::BookRepository;
    use chrono::TimeZone;
    use serial_test::serial;

    const SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../db/schema.sql"));

    async fn setup() -> (PgPool, BookRepository, BookingRepository) {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pool = PgPool::connect(&database_url).await.unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

        (
            pool.clone(),
            BookRepository::new(pool.clone()),
            BookingRepository::new(pool),
        )
    }

    async fn create_user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ('Test Reader', $1, 'not-a-real-hash')
            RETURNING id
            "#,
        )
        .bind(format!("reader-{}@example.com", Uuid::new_v4()))
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn create_book(books: &BookRepository, owner: Uuid) -> crate::models::Book {
        books
            .create(
                owner,
                &NewBook {
                    title: "A Wizard of Earthsea".to_string(),
                    author: "Ursula K. Le Guin".to_string(),
                    description: None,
                    thumbnail_url: None,
                    rating: Some(5),
                },
            )
            .await
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn booking_request(book_id: Uuid) -> NewBooking {
        NewBooking {
            book_id,
            borrow_date: date(2024, 1, 1),
            return_date: date(2024, 1, 15),
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_borrow_flow_with_overdue_return() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.overdue_fee, 0);

        // A pending booking reserves nothing
        let book_after_create = books.find_by_id(book.id).await.unwrap().unwrap();
        assert!(book_after_create.is_available);

        let approved = bookings.approve(booking.id).await.unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);
        let book_after_approve = books.find_by_id(book.id).await.unwrap().unwrap();
        assert!(!book_after_approve.is_available);

        let returned = bookings
            .return_booking(booking.id, Some(date(2024, 1, 20)))
            .await
            .unwrap();
        assert_eq!(returned.status, BookingStatus::Returned);
        assert_eq!(returned.overdue_fee, 5);
        assert_eq!(returned.actual_return_date, Some(date(2024, 1, 20)));

        let book_after_return = books.find_by_id(book.id).await.unwrap().unwrap();
        assert!(book_after_return.is_available);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_on_time_return_has_no_fee() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();
        bookings.approve(booking.id).await.unwrap();

        let returned = bookings
            .return_booking(booking.id, Some(date(2024, 1, 10)))
            .await
            .unwrap();
        assert_eq!(returned.overdue_fee, 0);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_rejects_inverted_dates() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let result = bookings
            .create(
                user,
                &NewBooking {
                    book_id: book.id,
                    borrow_date: date(2024, 1, 15),
                    return_date: date(2024, 1, 1),
                },
            )
            .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));

        let same_day = bookings
            .create(
                user,
                &NewBooking {
                    book_id: book.id,
                    borrow_date: date(2024, 1, 15),
                    return_date: date(2024, 1, 15),
                },
            )
            .await;
        assert!(matches!(same_day, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_duplicate_active_booking_is_conflict() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();

        let duplicate = bookings.create(user, &booking_request(book.id)).await;
        match duplicate {
            Err(ApiError::Conflict(msg)) => {
                assert!(msg.contains("already have a pending or approved booking"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_unavailable_book_is_conflict() {
        let (pool, books, bookings) = setup().await;
        let first = create_user(&pool).await;
        let second = create_user(&pool).await;
        let book = create_book(&books, first).await;

        let booking = bookings
            .create(first, &booking_request(book.id))
            .await
            .unwrap();
        bookings.approve(booking.id).await.unwrap();

        let refused = bookings.create(second, &booking_request(book.id)).await;
        match refused {
            Err(ApiError::Conflict(msg)) => {
                assert!(msg.contains("not available"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_second_approval_on_same_book_is_blocked() {
        let (pool, books, bookings) = setup().await;
        let first = create_user(&pool).await;
        let second = create_user(&pool).await;
        let book = create_book(&books, first).await;

        let first_booking = bookings
            .create(first, &booking_request(book.id))
            .await
            .unwrap();
        let second_booking = bookings
            .create(second, &booking_request(book.id))
            .await
            .unwrap();

        bookings.approve(first_booking.id).await.unwrap();
        let blocked = bookings.approve(second_booking.id).await;
        assert!(matches!(blocked, Err(ApiError::Conflict(_))));

        // Rejecting the loser must not free the book the winner holds
        bookings.reject(second_booking.id).await.unwrap();
        let book_state = books.find_by_id(book.id).await.unwrap().unwrap();
        assert!(!book_state.is_available);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_cancel_is_restricted_to_pending() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();
        bookings.approve(booking.id).await.unwrap();

        let refused = bookings.delete(booking.id).await;
        assert!(matches!(refused, Err(ApiError::InvalidState(_))));

        // The row is untouched
        let unchanged = bookings.find_by_id(booking.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, BookingStatus::Approved);

        let missing = bookings.delete(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_cancel_deletes_pending_booking() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();
        bookings.delete(booking.id).await.unwrap();

        assert!(bookings.find_by_id(booking.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_return_requires_approved_state() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();

        let refused = bookings.return_booking(booking.id, None).await;
        match refused {
            Err(ApiError::InvalidState(msg)) => {
                assert!(msg.contains("Only approved bookings can be returned"));
            }
            other => panic!("expected invalid state, got {other:?}"),
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_list_filters_and_search() {
        let (pool, books, bookings) = setup().await;
        let user = create_user(&pool).await;
        let book = create_book(&books, user).await;

        let booking = bookings
            .create(user, &booking_request(book.id))
            .await
            .unwrap();

        let (items, total) = bookings
            .list(&BookingQuery {
                user_id: Some(user),
                status: Some(BookingStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].booking.id, booking.id);
        assert_eq!(items[0].book_title, "A Wizard of Earthsea");

        let (found, _) = bookings
            .list(&BookingQuery {
                user_id: Some(user),
                search: Some("earthsea".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let (missed, _) = bookings
            .list(&BookingQuery {
                user_id: Some(user),
                search: Some("no such title".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(missed.is_empty());
    }
}
