use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use bookline::config::AppConfig;
use bookline::db;
use bookline::handlers;
use bookline::services::providers::crmcal::CrmCalProvider;
use bookline::services::providers::nexcal::NexcalProvider;
use bookline::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let primary = NexcalProvider::new(
        config.primary_cal_base_url.clone(),
        config.primary_cal_token_url.clone(),
        config.primary_cal_client_id.clone(),
        config.primary_cal_client_secret.clone(),
    );
    let secondary = CrmCalProvider::new(
        config.crm_cal_base_url.clone(),
        config.crm_cal_token_url.clone(),
        config.crm_cal_client_id.clone(),
        config.crm_cal_client_secret.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        primary: Box::new(primary),
        secondary: Box::new(secondary),
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
