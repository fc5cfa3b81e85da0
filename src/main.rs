//! Consulta Server
//!
//! Call matching relay with per-minute metered billing and revenue settlement.
//! Runs on PostgreSQL and Redis when configured, on in-process state otherwise.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use consulta_api::{configure_routes, AppState};
use consulta_cache::{MemoryAvailabilityCache, RedisAvailabilityCache};
use consulta_core::traits::{AvailabilityCache, Store};
use consulta_core::{AppConfig, Clock, SystemClock};
use consulta_db::{create_pool, MemoryStore, PgStore};
use consulta_services::{Drivers, TracingNotifier};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "consulta={lvl},consulta_api={lvl},consulta_services={lvl},consulta_db={lvl},consulta_cache={lvl},actix_web=info,sqlx=warn",
            lvl = log_level
        ))
    });

    let json = env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database.url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url, &config.database)
                .await
                .context("failed to create database pool")?;
            let store = PgStore::new(pool);
            if config.database.run_migrations {
                store.migrate().await.context("failed to run migrations")?;
            }
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database.url configured; using the in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn open_cache(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn AvailabilityCache>> {
    match &config.redis.url {
        Some(url) => {
            let cache = RedisAvailabilityCache::new(url, &config.redis.key_prefix)
                .await
                .context("failed to connect to redis")?;
            info!("Availability cache on Redis");
            Ok(Arc::new(cache))
        }
        None => {
            warn!("No redis.url configured; availability lives in process memory");
            Ok(Arc::new(MemoryAvailabilityCache::new(clock)))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Consulta v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = open_store(&config).await?;
    let cache = open_cache(&config, clock.clone()).await?;
    let state = AppState::new(
        &config,
        store,
        cache,
        Arc::new(TracingNotifier),
        clock,
    );

    let drivers = Drivers::start(
        state.scheduler.clone(),
        state.meter.clone(),
        config.matching.relay_tick(),
        config.billing.sweep_interval(),
    );
    info!(
        relay_tick_ms = config.matching.relay_tick_millis,
        sweep_secs = config.billing.sweep_interval_secs,
        "Relay and billing drivers started"
    );

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let cors_origins = config.server.cors_origins.clone();
    let server = HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::default().allow_any_origin()
        } else {
            cors_origins
                .iter()
                .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        };
        let cors = cors
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(state.jwt.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_json",
                        "message": error_message,
                        "status": 400
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
    })
    .workers(workers)
    .client_request_timeout(std::time::Duration::from_secs(config.server.timeout_secs))
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let result = server.await;
    drivers.shutdown();
    result.context("http server failed")?;

    info!("Consulta stopped");
    Ok(())
}
