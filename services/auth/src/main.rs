use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod jwt;
mod middleware;
mod models;
mod notifier;
mod password;
mod recovery;
mod repositories;
mod routes;
mod validation;

use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::jwt::{JwtConfig, JwtService};
use crate::notifier::{LogSender, NotificationSender, RelaySender};
use crate::recovery::{Environment, PasswordRecoveryService};
use crate::repositories::{PasswordResetRepository, UserRepository};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt_service: JwtService,
    pub user_repository: UserRepository,
    pub recovery: PasswordRecoveryService,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting auth service");

    // Initialize database connection pool
    let db_config = common::database::DatabaseConfig::from_env()?;
    let pool = common::database::init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Initialize JWT service
    let jwt_config = JwtConfig::from_env()?;
    let jwt_service = JwtService::new(jwt_config)?;

    // Outbound email goes through a relay when one is configured
    let notifier: Arc<dyn NotificationSender> = match std::env::var("MAIL_RELAY_URL") {
        Ok(url) => Arc::new(RelaySender::new(url)),
        Err(_) => {
            info!("MAIL_RELAY_URL not set, password reset emails will only be logged");
            Arc::new(LogSender)
        }
    };

    let environment = Environment::from_env();
    let user_repository = UserRepository::new(pool.clone());
    let recovery = PasswordRecoveryService::new(
        user_repository.clone(),
        PasswordResetRepository::new(pool.clone()),
        notifier,
        environment,
    );

    // Periodic purge of expired and spent reset tokens
    let cleanup_schedule =
        std::env::var("TOKEN_CLEANUP_SCHEDULE").unwrap_or_else(|_| "0 0 * * * *".to_string());
    let scheduler = JobScheduler::new().await?;
    let cleanup = recovery.clone();
    scheduler
        .add(Job::new_async(cleanup_schedule.as_str(), move |_id, _l| {
            let recovery = cleanup.clone();
            Box::pin(async move {
                recovery.cleanup_expired_tokens().await;
            })
        })?)
        .await?;
    scheduler.start().await?;
    info!("Token cleanup scheduled: {}", cleanup_schedule);

    let app_state = AppState {
        db_pool: pool,
        jwt_service,
        user_repository,
        recovery,
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Auth service listening on 0.0.0.0:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
