use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod middleware;
mod models;
mod repositories;
mod routes;
mod state;

use tokio::net::TcpListener;

use crate::middleware::JwtVerifier;
use crate::repositories::{BookRepository, BookingRepository};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting booking service");

    // Initialize database connection pool
    let db_config = common::database::DatabaseConfig::from_env()?;
    let pool = common::database::init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Token verification only needs the public half of the key pair
    let jwt_verifier = JwtVerifier::from_env()?;

    let app_state = AppState {
        db_pool: pool.clone(),
        book_repository: BookRepository::new(pool.clone()),
        booking_repository: BookingRepository::new(pool),
        jwt_verifier,
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind("0.0.0.0:3001").await?;
    info!("Booking service listening on 0.0.0.0:3001");

    axum::serve(listener, app).await?;

    Ok(())
}
