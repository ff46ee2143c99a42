//! Auth service repositories

pub mod password_reset;
pub mod user;

pub use password_reset::PasswordResetRepository;
pub use user::UserRepository;
