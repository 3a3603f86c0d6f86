use std::sync::Arc;

use tracing::info;

use eduflow_db::Database;
use eduflow_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eduflow_server=debug,eduflow_gateway=debug,eduflow_api=debug,eduflow_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.service_token.is_none() {
        info!("EDUFLOW_SERVICE_TOKEN not set; enrollment webhook is open");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let app = eduflow_server::app(&config, db);

    let addr = config.addr()?;
    info!("EduFlow realtime listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
