use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use huddle_db::Database;
use huddle_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;

    // Storage must be reachable before anyone can connect
    let db = Database::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    info!(
        "Channel '{}', edit window {}s, multiple votes {}",
        config.channel,
        config.edit_window.num_seconds(),
        if config.allow_multiple_votes { "allowed" } else { "refused" }
    );

    let app = huddle_server::build_router(Arc::new(db), &config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    huddle_server::serve(listener, app).await
}
