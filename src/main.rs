mod api; // HTTP surface for the estimation pipeline
mod config;
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::Config;
use handlers::EstimateHandler;
use services::{
    Database, EstimationService, ImageFetcher, LocalBlobStore, ModelInvoker, OpenRouterService,
    QuotaGate,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting Nutrition Estimator...");

    let config = Config::from_env()?;

    // Initialize PostgreSQL database (quota counter + meal persistence)
    let db = Arc::new(Database::new(&config.database_url).await?);
    log::info!("✅ PostgreSQL database initialized");

    let openrouter = Arc::new(OpenRouterService::new(
        config.openrouter_api_key.clone(),
        config.openrouter_model.clone(),
    ));
    log::info!("✅ OpenRouter service initialized with model: {}", openrouter.model());

    let blobs = Arc::new(LocalBlobStore::new(&config.image_dir));
    log::info!("✅ Image store: {}", config.image_dir);

    let estimator = Arc::new(EstimationService::from_parts(
        QuotaGate::new(db.clone(), config.monthly_limit),
        ImageFetcher::new(blobs),
        ModelInvoker::new(openrouter).with_attempt_timeout(config.attempt_timeout),
    ));
    log::info!(
        "✅ Estimation service initialized (limit: {}/month, attempt timeout: {}s)",
        config.monthly_limit,
        config.attempt_timeout.as_secs()
    );

    let estimate_handler = Arc::new(EstimateHandler::new(estimator, db.clone()));

    #[cfg(feature = "webhook-server")]
    {
        use api::server::create_router;

        let app = create_router(estimate_handler.clone());
        let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
        log::info!("🌐 Server listening on {}", config.server_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await?;
    }

    #[cfg(not(feature = "webhook-server"))]
    {
        let _ = estimate_handler;
        log::warn!("⚠️ Built without webhook-server; nothing to serve");
        tokio::signal::ctrl_c().await?;
    }

    log::info!("🛑 Shutting down...");
    Ok(())
}
