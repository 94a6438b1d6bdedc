//! Service wiring: adapters, services and the HTTP server

use anyhow::{Context, Result};
use common::{
    Ctx, LogProvider,
    cache::{
        CacheProvider, DEFAULT_TTL, MemoryCache, RedisCache, RedisConfig,
        memory::DEFAULT_CLEANUP_INTERVAL,
    },
    database::{DatabaseConfig, init_pool},
    error::DatabaseError,
    log_body,
    rest::HttpClient,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::AppConfig,
    domain::{FoursquareConfig, UsersService, VenuesService},
    repositories::PgUsersRepo,
    routes,
    state::AppState,
};

/// Pick the cache backend: Redis when configured, in-process otherwise
pub fn build_cache(config: &AppConfig) -> Result<Arc<dyn CacheProvider>> {
    match config.redis_url() {
        Some(url) => {
            let redis = RedisCache::new(&RedisConfig::new(url, config.redis_password()))
                .context("could not configure the redis cache")?;
            Ok(Arc::new(redis))
        }
        None => {
            let memory = MemoryCache::new(DEFAULT_TTL);
            memory.spawn_cleanup(DEFAULT_CLEANUP_INTERVAL);
            Ok(Arc::new(memory))
        }
    }
}

/// Run the API until `shutdown` resolves
pub async fn start_api(
    config: AppConfig,
    logger: Arc<dyn LogProvider>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let ctx = Ctx::background();

    let rest = HttpClient::new(Duration::from_secs(config.rest_timeout_secs))?;
    let cache = build_cache(&config)?;

    let pool = match init_pool(&DatabaseConfig::new(&config.database_url)).await {
        Ok(pool) => pool,
        Err(err) => logger.fatal(
            &ctx,
            "unable-to-start-database",
            &[log_body! { "error" => err.to_string() }],
        ),
    };
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    info!("Database migrations applied");

    let users = UsersService::new(logger.clone(), Arc::new(PgUsersRepo::new(pool)));
    let venues = VenuesService::new(
        logger.clone(),
        Arc::new(rest),
        cache,
        FoursquareConfig {
            base_url: config.foursquare_base_url.clone(),
            client_id: config.foursquare_client_id.clone(),
            secret: config.foursquare_secret.clone(),
        },
    );
    let app = routes::create_router(AppState::new(logger.clone(), users, venues));

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    logger.info(
        &ctx,
        "server-starting-up",
        &[log_body! { "port" => config.port }],
    );
    info!("API service listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    logger.info(&ctx, "server-stopped", &[]);
    Ok(())
}
