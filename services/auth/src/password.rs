//! Password strength scoring
//!
//! Five independent checks each contribute one point: length, uppercase,
//! lowercase, digit, and a symbol from the accepted punctuation set. A
//! password is acceptable only when every check passes.

use serde::Serialize;

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Punctuation characters that count as a symbol
const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>?/`~\\";

/// Result of scoring a candidate password
#[derive(Debug, Clone, Serialize)]
pub struct StrengthReport {
    pub is_valid: bool,
    pub score: u8,
    pub feedback: Vec<String>,
}

/// Score a candidate password
///
/// Total and deterministic: any input yields a score in 0..=5, and
/// `is_valid` holds exactly when all five checks pass. Feedback carries one
/// message per failed check, in a fixed order.
pub fn validate_password_strength(password: &str) -> StrengthReport {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| SYMBOLS.contains(c));

    let mut feedback = Vec::new();
    if !long_enough {
        feedback.push(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        ));
    }
    if !has_upper {
        feedback.push("Password must contain at least one uppercase letter".to_string());
    }
    if !has_lower {
        feedback.push("Password must contain at least one lowercase letter".to_string());
    }
    if !has_digit {
        feedback.push("Password must contain at least one digit".to_string());
    }
    if !has_symbol {
        feedback.push("Password must contain at least one special character".to_string());
    }

    let score = [long_enough, has_upper, has_lower, has_digit, has_symbol]
        .iter()
        .filter(|passed| **passed)
        .count() as u8;

    StrengthReport {
        is_valid: score == 5 && long_enough,
        score,
        feedback,
    }
}
