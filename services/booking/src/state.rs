//! Application state shared across handlers

use sqlx::PgPool;

use crate::middleware::JwtVerifier;
use crate::repositories::{BookRepository, BookingRepository};

/// Application state shared across handlers
///
/// All handles are constructed once at startup and injected; nothing is
/// reached through global state.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub book_repository: BookRepository,
    pub booking_repository: BookingRepository,
    pub jwt_verifier: JwtVerifier,
}
