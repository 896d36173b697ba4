use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use access::{
    AppState, Backends, build_controller,
    clock::{SystemClock, UuidGenerator},
    config::{AccessConfig, RequestLogBackend},
    jobs::RetentionJob,
    routes,
    store::{PgStore, RedisRequestLog, RequestLog},
};
use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting access-control service");

    let config = AccessConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let pg_store = Arc::new(PgStore::new(pool));
    pg_store.migrate().await?;

    let request_log: Arc<dyn RequestLog> = match config.rate_limit.backend {
        RequestLogBackend::Postgres => pg_store.clone() as Arc<dyn RequestLog>,
        RequestLogBackend::Redis => {
            let redis_config = RedisConfig::from_env()?;
            let redis_pool = RedisPool::new(&redis_config).await?;
            if !redis_pool.health_check().await? {
                anyhow::bail!("Redis did not answer PING");
            }
            let widest = config
                .rate_limit
                .rules
                .iter()
                .map(|rule| rule.window_seconds)
                .max()
                .unwrap_or(60);
            Arc::new(RedisRequestLog::new(redis_pool, widest)) as Arc<dyn RequestLog>
        }
    };
    info!("Request log backend: {:?}", config.rate_limit.backend);

    let controller = build_controller(
        Backends {
            sessions: pg_store.clone(),
            bans: pg_store,
            request_log,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        },
        &config,
    );

    let retention = RetentionJob::new(
        controller.sessions().clone(),
        controller.limiter().clone(),
        config.session.purge_grace_seconds,
    );
    let mut scheduler = retention.start(&config.retention.schedule).await?;

    if config.service_token.is_none() {
        info!("No service token configured, internal API is unauthenticated");
    }

    let app_state = AppState {
        controller,
        service_token: config.service_token.clone(),
    };
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Access-control service listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down access-control service");
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
