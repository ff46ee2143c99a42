//! Password reset token model

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Password reset token row
///
/// The opaque token is single-use: it is redeemable only while `used` is
/// false and `expires_at` lies in the future. The raw token is mailed to
/// the user and never serialized into API responses.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordReset {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
