use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use booking_core::config::{AppConfig, StoreBackend};
use booking_core::db;
use booking_core::scheduling::handlers::{create_router, AppState};
use booking_core::scheduling::{
    AuditSink, CallTimeout, ChannelBroadcaster, Collaborators, EngineOptions, LogAuditLogger,
    NoPromotions, PerformanceMetrics, PgAuditLogger, PgPromotionResolver, PromotionResolver,
    SchedulingEngine, StoreSettingsProvider,
};
use booking_core::store::{KeyValueCache, MemoryCache, MemoryStore, PgStore, RedisCache, SchedulingStore};

/// Prefix for every cache key written by this service
const CACHE_PREFIX: &str = "booking";

/// Buffered assignment events per subscriber
const BROADCAST_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Booking scheduling core - Starting...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = CallTimeout::new(config.call_timeout);
    let metrics = PerformanceMetrics::new();

    let (store, promotions, audit, tenants): (
        Arc<dyn SchedulingStore>,
        Arc<dyn PromotionResolver>,
        Arc<dyn AuditSink>,
        Vec<uuid::Uuid>,
    ) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().unwrap_or_default();

            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url, config.db_max_connections)
                .await
                .expect("Failed to create database pool");

            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            let tenants = db::list_tenants(&pool).await.unwrap_or_else(|e| {
                tracing::warn!("Could not list tenants for cache warm-up: {}", e);
                Vec::new()
            });

            (
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgPromotionResolver::new(pool.clone())),
                Arc::new(PgAuditLogger::new(pool)),
                tenants,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(NoPromotions),
                Arc::new(LogAuditLogger),
                Vec::new(),
            )
        }
    };

    let cache: Arc<dyn KeyValueCache> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            tracing::info!("Connecting to Redis...");
            Arc::new(
                RedisCache::connect(redis_url, CACHE_PREFIX)
                    .await
                    .expect("Failed to connect to Redis"),
            )
        }
        None => {
            tracing::info!("REDIS_URL not set, using the in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let settings = StoreSettingsProvider::new(store.clone(), cache.clone())
        .with_ttl(config.settings_cache_ttl)
        .with_timeout(timeout)
        .with_metrics(metrics.clone());

    let engine = SchedulingEngine::new(
        Collaborators {
            store,
            cache,
            settings: Arc::new(settings),
            promotions,
            broadcaster: Arc::new(ChannelBroadcaster::new(BROADCAST_CAPACITY)),
            audit,
            metrics,
        },
        EngineOptions {
            call_timeout: timeout,
            default_currency: config.default_currency.clone(),
            multi_tenant: config.multi_tenant,
        },
    );

    let warmed = engine.warm_cache(&tenants).await;
    tracing::info!("Warmed settings for {} tenants", warmed);

    let app = create_router(AppState {
        engine: Arc::new(engine),
        require_tenant: config.multi_tenant,
    });

    let addr = config.bind_address();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Booking API is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app).await.expect("Server error");
}
