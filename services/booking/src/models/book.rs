//! Book catalog models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Book entity
///
/// `is_available` is owned by the booking lifecycle: it is false exactly
/// while one approved booking holds the book.
#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub rating: Option<i16>,
    pub uploaded_by: Uuid,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New book payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub rating: Option<i16>,
}

impl NewBook {
    /// Validate the payload, returning a message for the first failure
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title is required".to_string());
        }
        if self.author.trim().is_empty() {
            return Err("Author is required".to_string());
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err("Rating must be between 1 and 5".to_string());
            }
        }
        Ok(())
    }
}

/// Query parameters for book listing
#[derive(Debug, Clone, Deserialize)]
pub struct BookQuery {
    /// Page number (1-based)
    pub page: Option<u32>,
    /// Number of items per page
    pub limit: Option<u32>,
}

/// Response for book listing with pagination
#[derive(Debug, Clone, Serialize)]
pub struct BookListResponse {
    pub items: Vec<Book>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}
