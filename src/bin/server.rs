//! The self-hosted server binary: env config, pool with startup retry,
//! migrations, default buckets, then the full route table.

use folio_sdk::server::auth::JwtKeys;
use folio_sdk::server::email::Mailer;
use folio_sdk::server::storage::ObjectStore;
use folio_sdk::server::{router, AppState};
use folio_sdk::{connect_pool, migrate};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("folio_sdk=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/folio".into());
    let jwt_secret = std::env::var("JWT_SECRET")?;

    let pool = connect_pool(&database_url).await?;
    migrate::run(&pool).await?;

    let storage = ObjectStore::from_env().await?;
    storage.ensure_default_buckets().await?;

    let mailer = Mailer::from_env()?;
    if mailer.is_none() {
        tracing::info!("SMTP_HOST not set, outbound email disabled");
    }

    let state = AppState::new(pool, JwtKeys::new(&jwt_secret), storage, mailer);
    let app = router(state);

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
