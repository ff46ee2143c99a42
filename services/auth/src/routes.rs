//! Auth service routes

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    AppState,
    error::AppError,
    middleware::{AuthUser, auth_middleware},
    models::user::{LoginCredentials, NewUser},
    password::validate_password_strength,
    validation::{validate_email, validate_name},
};

/// Response for token issuance
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Request for the forgot-password flow
#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request for redeeming a reset token
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Request for the authenticated change-password flow
#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Request for standalone password scoring
#[derive(Deserialize)]
pub struct ValidatePasswordRequest {
    pub password: String,
}

/// Create the router for the auth service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/change-password", post(change_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/validate-password", post(validate_password))
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
        "service": "auth-service",
        "database": database,
    }))
}

/// Register a new user
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> Result<Response, AppError> {
    validate_name(&payload.name).map_err(AppError::Validation)?;
    validate_email(&payload.email).map_err(AppError::Validation)?;

    let report = validate_password_strength(&payload.password);
    if !report.is_valid {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Password does not meet the strength requirements",
                "feedback": report.feedback,
            })),
        )
            .into_response());
    }

    let user = state.user_repository.create(&payload).await?;
    info!("Registered user: {}", user.id);

    Ok((StatusCode::CREATED, Json(user)).into_response())
}

/// Issue an access token for valid credentials
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginCredentials>,
) -> Result<impl IntoResponse, AppError> {
    // One message for unknown email and wrong password alike
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = state
        .user_repository
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(invalid)?;

    if !state.user_repository.verify_password(&user, &payload.password)? {
        return Err(invalid());
    }

    let access_token = state.jwt_service.generate_access_token(&user).map_err(|e| {
        error!("Failed to generate access token: {}", e);
        AppError::Internal(e)
    })?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt_service.access_token_expiry(),
    }))
}

/// Start the forgot-password flow
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_email(&payload.email).map_err(AppError::Validation)?;

    let outcome = state.recovery.initiate_forgot_password(&payload.email).await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((status, Json(outcome)))
}

/// Redeem a reset token
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .recovery
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((status, Json(outcome)))
}

/// Change the authenticated user's password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .recovery
        .change_password(
            auth_user.id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((status, Json(outcome)))
}

/// Score a candidate password without storing anything
pub async fn validate_password(
    Json(payload): Json<ValidatePasswordRequest>,
) -> impl IntoResponse {
    Json(validate_password_strength(&payload.password))
}
