//! Password recovery workflows
//!
//! Owns issuance, single-use redemption, and rate limiting of reset tokens,
//! plus the authenticated change-password flow. Outcomes that are part of
//! the API contract (wrong token, weak password, rate limited) are returned
//! as payloads rather than errors so the boundary layer never has to guess
//! which internal check failed.

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::notifier::NotificationSender;
use crate::password::validate_password_strength;
use crate::repositories::{PasswordResetRepository, UserRepository, user};

/// Maximum reset requests per user within the trailing window
pub const MAX_REQUESTS_PER_WINDOW: i64 = 3;

/// Trailing window for the request rate limit
pub const RATE_LIMIT_WINDOW_HOURS: i64 = 1;

/// Reset token lifetime
pub const TOKEN_TTL_HOURS: i64 = 1;

const TOKEN_BYTES: usize = 32;

const GENERIC_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";
const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired reset token";

/// Runtime environment, controls the email-failure fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read the runtime environment from `APP_ENV` (default: development)
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Outcome of a password workflow operation
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub message: String,
    /// Raw reset token, present only on the non-production email-failure
    /// fallback path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
    /// One message per failed strength check
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
}

impl RecoveryOutcome {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            reset_token: None,
            feedback: Vec::new(),
        }
    }

    fn fail(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            reset_token: None,
            feedback: Vec::new(),
        }
    }

    fn weak_password(feedback: Vec<String>) -> Self {
        Self {
            success: false,
            message: "Password does not meet the strength requirements".to_string(),
            reset_token: None,
            feedback,
        }
    }
}

/// Password recovery workflows over the user and reset-token stores
#[derive(Clone)]
pub struct PasswordRecoveryService {
    users: UserRepository,
    resets: PasswordResetRepository,
    notifier: Arc<dyn NotificationSender>,
    environment: Environment,
}

impl PasswordRecoveryService {
    pub fn new(
        users: UserRepository,
        resets: PasswordResetRepository,
        notifier: Arc<dyn NotificationSender>,
        environment: Environment,
    ) -> Self {
        Self {
            users,
            resets,
            notifier,
            environment,
        }
    }

    /// Whether the email's account is currently allowed to request a reset
    ///
    /// Unknown emails are allowed through; existence is not signalled here.
    pub async fn check_rate_limit(&self, email: &str) -> AppResult<bool> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Ok(true);
        };

        let since = Utc::now() - Duration::hours(RATE_LIMIT_WINDOW_HOURS);
        let count = self.resets.count_created_since(user.id, since).await?;
        Ok(count < MAX_REQUESTS_PER_WINDOW)
    }

    /// Start the forgot-password flow for an email address
    pub async fn initiate_forgot_password(&self, email: &str) -> AppResult<RecoveryOutcome> {
        let Some(user) = self.users.find_by_email(email).await? else {
            // Indistinguishable from the delivered-email path: no enumeration
            return Ok(RecoveryOutcome::ok(GENERIC_MESSAGE));
        };

        if !user.is_verified {
            return Ok(RecoveryOutcome::fail(
                "Please verify your email address before requesting a password reset",
            ));
        }

        let since = Utc::now() - Duration::hours(RATE_LIMIT_WINDOW_HOURS);
        let recent = self.resets.count_created_since(user.id, since).await?;
        if recent >= MAX_REQUESTS_PER_WINDOW {
            return Ok(RecoveryOutcome::fail(
                "Too many password reset requests. Please try again later",
            ));
        }

        let token = generate_reset_token();
        let expires_at = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
        self.resets.create(user.id, &token, expires_at).await?;

        match self
            .notifier
            .send_password_reset(&user.email, &token)
            .await
        {
            Ok(()) => Ok(RecoveryOutcome::ok(GENERIC_MESSAGE)),
            Err(e) if self.environment.is_production() => {
                warn!("Password reset email failed for {}: {}", user.email, e);
                Ok(RecoveryOutcome::fail(
                    "We could not send the reset email. Please contact support",
                ))
            }
            Err(e) => {
                // Local/test fallback: hand the token back instead of mailing it
                warn!("Password reset email failed for {}: {}", user.email, e);
                let mut outcome =
                    RecoveryOutcome::ok("Email delivery failed; use the returned token to reset");
                outcome.reset_token = Some(token);
                Ok(outcome)
            }
        }
    }

    /// Redeem a reset token and install a new password
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> AppResult<RecoveryOutcome> {
        let report = validate_password_strength(new_password);
        if !report.is_valid {
            return Ok(RecoveryOutcome::weak_password(report.feedback));
        }

        let password_hash = user::hash_password_sensitive(new_password)?;

        // One message for unknown, expired, and spent tokens alike
        match self.resets.redeem(token, &password_hash).await? {
            Some(user_id) => {
                info!("Password reset completed for user: {}", user_id);
                Ok(RecoveryOutcome::ok("Password has been reset successfully"))
            }
            None => Ok(RecoveryOutcome::fail(INVALID_TOKEN_MESSAGE)),
        }
    }

    /// Change the password of an authenticated user
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<RecoveryOutcome> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !self.users.verify_password(&user, current_password)? {
            return Ok(RecoveryOutcome::fail("Current password is incorrect"));
        }

        let report = validate_password_strength(new_password);
        if !report.is_valid {
            return Ok(RecoveryOutcome::weak_password(report.feedback));
        }

        // Compared via hash verification, never as plaintext
        if self.users.verify_password(&user, new_password)? {
            return Ok(RecoveryOutcome::fail(
                "New password must be different from your current password",
            ));
        }

        let password_hash = user::hash_password(new_password)?;
        self.users.update_password(user.id, &password_hash).await?;

        info!("Password changed for user: {}", user.id);
        Ok(RecoveryOutcome::ok("Password changed successfully"))
    }

    /// Purge expired and spent reset tokens
    ///
    /// Best-effort maintenance: failures are logged, never propagated.
    pub async fn cleanup_expired_tokens(&self) {
        match self.resets.delete_expired().await {
            Ok(removed) if removed > 0 => {
                info!("Removed {} expired password reset tokens", removed);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Password reset token cleanup failed: {}", e);
            }
        }
    }
}

/// Generate a cryptographically random hex-encoded reset token
fn generate_reset_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    bytes.iter().fold(
        String::with_capacity(TOKEN_BYTES * 2),
        |mut token, byte| {
            let _ = write!(token, "{byte:02x}");
            token
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::notifier::{MockNotificationSender, NotifyError};
    use serial_test::serial;
    use sqlx::PgPool;

    #[test]
    fn test_generated_tokens_are_hex_and_unique() {
        let first = generate_reset_token();
        let second = generate_reset_token();

        assert_eq!(first.len(), TOKEN_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_environment_from_env() {
        unsafe {
            std::env::set_var("APP_ENV", "production");
        }
        assert!(Environment::from_env().is_production());

        unsafe {
            std::env::set_var("APP_ENV", "development");
        }
        assert!(!Environment::from_env().is_production());

        unsafe {
            std::env::remove_var("APP_ENV");
        }
        assert!(!Environment::from_env().is_production());
    }

    const SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../db/schema.sql"));

    async fn setup(notifier: MockNotificationSender) -> (PgPool, PasswordRecoveryService) {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pool = PgPool::connect(&database_url).await.unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

        let service = PasswordRecoveryService::new(
            UserRepository::new(pool.clone()),
            PasswordResetRepository::new(pool.clone()),
            Arc::new(notifier),
            Environment::Development,
        );
        (pool, service)
    }

    async fn create_verified_user(pool: &PgPool, email: &str) -> crate::models::User {
        let users = UserRepository::new(pool.clone());
        let user = users
            .create(&NewUser {
                name: "Test Reader".to_string(),
                email: email.to_string(),
                password: "Origin4l!pass".to_string(),
            })
            .await
            .unwrap();

        sqlx::query("UPDATE users SET is_verified = true WHERE id = $1")
            .bind(user.id)
            .execute(pool)
            .await
            .unwrap();

        users.find_by_id(user.id).await.unwrap().unwrap()
    }

    fn unique_email(prefix: &str) -> String {
        format!("{prefix}-{}@example.com", Uuid::new_v4())
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_reset_token_is_single_use() {
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send_password_reset()
            .returning(|_, _| Err(NotifyError::Rejected("relay down".to_string())));

        let (pool, service) = setup(notifier).await;
        let user = create_verified_user(&pool, &unique_email("single-use")).await;

        let outcome = service.initiate_forgot_password(&user.email).await.unwrap();
        assert!(outcome.success);
        let token = outcome.reset_token.expect("dev fallback returns the token");

        let first = service.reset_password(&token, "NewPass123!").await.unwrap();
        assert!(first.success);

        let second = service
            .reset_password(&token, "Another123!")
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(second.message, INVALID_TOKEN_MESSAGE);

        // The first reset stuck; the replay changed nothing
        let users = UserRepository::new(pool.clone());
        let reloaded = users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(users.verify_password(&reloaded, "NewPass123!").unwrap());
        assert!(!users.verify_password(&reloaded, "Another123!").unwrap());
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_rate_limit_caps_requests_per_window() {
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send_password_reset()
            .returning(|_, _| Ok(()));

        let (pool, service) = setup(notifier).await;
        let user = create_verified_user(&pool, &unique_email("rate-limit")).await;

        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            let outcome = service.initiate_forgot_password(&user.email).await.unwrap();
            assert!(outcome.success);
        }

        assert!(!service.check_rate_limit(&user.email).await.unwrap());
        let fourth = service.initiate_forgot_password(&user.email).await.unwrap();
        assert!(!fourth.success);
        assert!(fourth.message.contains("Too many"));
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_unknown_email_gets_generic_success() {
        let notifier = MockNotificationSender::new();
        let (_pool, service) = setup(notifier).await;

        let outcome = service
            .initiate_forgot_password(&unique_email("nobody"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, GENERIC_MESSAGE);
        assert!(outcome.reset_token.is_none());
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_unverified_user_is_refused() {
        let notifier = MockNotificationSender::new();
        let (pool, service) = setup(notifier).await;

        let users = UserRepository::new(pool.clone());
        let user = users
            .create(&NewUser {
                name: "Unverified".to_string(),
                email: unique_email("unverified"),
                password: "Origin4l!pass".to_string(),
            })
            .await
            .unwrap();

        let outcome = service.initiate_forgot_password(&user.email).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("verify your email"));
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_delivered_email_never_leaks_token() {
        let mut notifier = MockNotificationSender::new();
        notifier
            .expect_send_password_reset()
            .returning(|_, _| Ok(()));

        let (pool, service) = setup(notifier).await;
        let user = create_verified_user(&pool, &unique_email("delivered")).await;

        let outcome = service.initiate_forgot_password(&user.email).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, GENERIC_MESSAGE);
        assert!(outcome.reset_token.is_none());
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn test_change_password_flow() {
        let notifier = MockNotificationSender::new();
        let (pool, service) = setup(notifier).await;
        let user = create_verified_user(&pool, &unique_email("change")).await;

        let wrong = service
            .change_password(user.id, "not-the-password", "NewPass123!")
            .await
            .unwrap();
        assert!(!wrong.success);
        assert!(wrong.message.contains("incorrect"));

        let weak = service
            .change_password(user.id, "Origin4l!pass", "short")
            .await
            .unwrap();
        assert!(!weak.success);
        assert!(!weak.feedback.is_empty());

        let same = service
            .change_password(user.id, "Origin4l!pass", "Origin4l!pass")
            .await
            .unwrap();
        assert!(!same.success);
        assert!(same.message.contains("different"));

        let changed = service
            .change_password(user.id, "Origin4l!pass", "NewPass123!")
            .await
            .unwrap();
        assert!(changed.success);
    }
}
