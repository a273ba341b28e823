use std::sync::Arc;

use gym_check_in_service::{
    adapters::database::postgres::PostgresDatabase, commands::DomainLogic, config::Config, http,
    logging,
};
use secrecy::ExposeSecret;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    logging::init_logging(&config);

    let database = Arc::new(
        PostgresDatabase::connect(config.postgres_url.expose_secret(), config.max_connections)
            .await?,
    );
    database.migrate().await?;
    info!("database ready");

    let app = http::router(DomainLogic::new(database.clone(), database));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
