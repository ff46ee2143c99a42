//! Booking service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{AuthUser, auth_middleware, require_admin},
    models::{
        book::{BookListResponse, BookQuery, NewBook},
        booking::{
            Booking, BookingListResponse, BookingQuery, NewBooking, ReturnRequest, total_pages,
        },
    },
    state::AppState,
};

/// Create the router for the booking service
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/books", post(create_book))
        .route("/books/:id", delete(delete_book))
        .route("/bookings", get(list_bookings))
        .route("/bookings/:id/approve", put(approve_booking))
        .route("/bookings/:id/reject", put(reject_booking))
        .route_layer(middleware::from_fn(require_admin));

    let protected_routes = Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/my", get(list_my_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id", delete(cancel_booking))
        .route("/bookings/:id/return", put(return_booking))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/books", get(list_books))
        .route("/books/:id", get(get_book))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "service": "booking-service",
        "database": database,
    }))
}

/// Add a book to the catalog
pub async fn create_book(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NewBook>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state
        .book_repository
        .create(auth_user.id, &payload)
        .await?;

    Ok((StatusCode::CREATED, Json(book)))
}

/// List books with pagination
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<BookQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let (items, total) = state.book_repository.list(page, limit).await?;

    Ok(Json(BookListResponse {
        items,
        page,
        limit,
        total,
        total_pages: total_pages(total, limit),
    }))
}

/// Get a book by ID
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state
        .book_repository
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Book not found".to_string()))?;

    Ok(Json(book))
}

/// Remove a book from the catalog
pub async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.book_repository.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a pending booking for the authenticated user
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NewBooking>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .booking_repository
        .create(auth_user.id, &payload)
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// List all bookings with filters and free-text search
pub async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_response(&state, query).await
}

/// List the authenticated user's bookings
pub async fn list_my_bookings(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(mut query): Query<BookingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    query.user_id = Some(auth_user.id);
    list_response(&state, query).await
}

async fn list_response(
    state: &AppState,
    query: BookingQuery,
) -> Result<Json<BookingListResponse>, ApiError> {
    let (page, limit) = query.pagination();
    let (items, total) = state.booking_repository.list(&query).await?;

    Ok(Json(BookingListResponse {
        items,
        page,
        limit,
        total,
        total_pages: total_pages(total, limit),
    }))
}

/// Get a booking by ID; non-admins may only read their own
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = find_booking(&state, id).await?;

    if booking.user_id != auth_user.id && !auth_user.role.is_admin() {
        return Err(ApiError::Forbidden(
            "You may only view your own bookings".to_string(),
        ));
    }

    Ok(Json(booking))
}

/// Approve a pending booking, reserving the book
pub async fn approve_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.booking_repository.approve(id).await?;
    Ok(Json(booking))
}

/// Reject a pending booking
pub async fn reject_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.booking_repository.reject(id).await?;
    Ok(Json(booking))
}

/// Return an approved booking; the holder or an admin may do this
pub async fn return_booking(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReturnRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = find_booking(&state, id).await?;
    if booking.user_id != auth_user.id && !auth_user.role.is_admin() {
        return Err(ApiError::Forbidden(
            "You may only return your own bookings".to_string(),
        ));
    }

    let actual_return_date = payload.and_then(|Json(body)| body.actual_return_date);
    let booking = state
        .booking_repository
        .return_booking(id, actual_return_date)
        .await?;

    Ok(Json(booking))
}

/// Cancel a pending booking; the holder or an admin may do this
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = find_booking(&state, id).await?;
    if booking.user_id != auth_user.id && !auth_user.role.is_admin() {
        return Err(ApiError::Forbidden(
            "You may only cancel your own bookings".to_string(),
        ));
    }

    state.booking_repository.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find_booking(state: &AppState, id: Uuid) -> Result<Booking, ApiError> {
    state
        .booking_repository
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Booking not found".to_string()))
}
