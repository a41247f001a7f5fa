//! Process entry point: load configuration, wire components, serve HTTP,
//! drain webhook deliveries on shutdown.

use actix_web::{web, App, HttpServer};
use business_verifier::config::Config;
use business_verifier::http::{cors, health, verify_business, verify_business_batch};
use business_verifier::ledger::HorizonLedgerClient;
use business_verifier::orchestrator::Engine;
use business_verifier::store::PgStore;
use business_verifier::webhook::WebhookDispatcher;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = Arc::new(Config::from_env());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|err| std::io::Error::other(format!("failed to connect to database: {err}")))?;

    let store: Arc<dyn business_verifier::store::Store> = Arc::new(PgStore::new(pool));
    let ledger: Arc<dyn business_verifier::ledger::LedgerClient> = Arc::new(
        HorizonLedgerClient::new(config.ledger_base.clone(), config.ledger_timeout),
    );
    let webhooks = Arc::new(WebhookDispatcher::new(store.clone()));

    let engine = web::Data::new(Engine {
        config: config.clone(),
        store,
        ledger,
        webhooks: webhooks.clone(),
    });
    let webhooks_data = web::Data::from(webhooks.clone());

    log::info!("binding business verification service on {}", config.bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors())
            .app_data(engine.clone())
            .app_data(webhooks_data.clone())
            .route("/health", web::get().to(health))
            .route("/verify-business", web::post().to(verify_business))
            .route(
                "/verify-business-batch",
                web::post().to(verify_business_batch),
            )
    })
    .bind(&config.bind_address)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    log::info!("shutdown signal received, draining in-flight webhook deliveries");

    server_handle.stop(true).await;
    let _ = server_task.await;
    webhooks.drain().await;

    log::info!("shutdown complete");
    Ok(())
}
