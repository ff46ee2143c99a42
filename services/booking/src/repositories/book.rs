//! Book repository for database operations

use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::book::{Book, NewBook};

const BOOK_COLUMNS: &str = "id, title, author, description, thumbnail_url, rating, \
     uploaded_by, is_available, created_at, updated_at";

/// Book repository
#[derive(Clone)]
pub struct BookRepository {
    pool: PgPool,
}

impl BookRepository {
    /// Create a new book repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a book to the catalog
    pub async fn create(&self, uploaded_by: Uuid, new_book: &NewBook) -> ApiResult<Book> {
        new_book.validate().map_err(ApiError::Validation)?;

        info!("Creating book: {}", new_book.title);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO books (title, author, description, thumbnail_url, rating, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(&new_book.title)
        .bind(&new_book.author)
        .bind(&new_book.description)
        .bind(&new_book.thumbnail_url)
        .bind(new_book.rating)
        .bind(uploaded_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(map_book(&row))
    }

    /// Find a book by ID
    pub async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Book>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BOOK_COLUMNS}
            FROM books
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_book))
    }

    /// List books with pagination
    pub async fn list(&self, page: u32, limit: u32) -> ApiResult<(Vec<Book>, i64)> {
        let offset = i64::from(page - 1) * i64::from(limit);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOK_COLUMNS}
            FROM books
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        let books = rows.iter().map(map_book).collect();
        Ok((books, total))
    }

    /// Remove a book from the catalog
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Book not found".to_string()));
        }

        info!("Deleted book: {}", id);
        Ok(())
    }
}

pub(crate) fn map_book(row: &PgRow) -> Book {
    Book {
        id: row.get("id"),
        title: row.get("title"),
        author: row.get("author"),
        description: row.get("description"),
        thumbnail_url: row.get("thumbnail_url"),
        rating: row.get("rating"),
        uploaded_by: row.get("uploaded_by"),
        is_available: row.get("is_available"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
