use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backup_orchestrator::config::Config;
use backup_orchestrator::engine::{
    Dispatcher, JobStore, LivenessMonitor, PgJobStore, ProcessorRegistry, Scheduler,
};
use backup_orchestrator::middleware;
use backup_orchestrator::routes;
use backup_orchestrator::sources::gmail::{GmailProcessor, MockGmailSource};
use backup_orchestrator::sources::object_store::InMemoryObjectStore;
use backup_orchestrator::sources::outlook::{MockOutlookSource, OutlookProcessor};
use backup_orchestrator::sources::ObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "backup_orchestrator=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let connect_opts = config
        .database_url
        .parse::<sqlx::postgres::PgConnectOptions>()?
        .statement_cache_capacity(0);
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect_with(connect_opts)
        .await?;

    tracing::info!("connected to database");

    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _migrations (version INT PRIMARY KEY, applied_at TIMESTAMPTZ DEFAULT now())",
    )
    .execute(&pool)
    .await?;

    let migrations: &[(i32, &str)] = &[(1, include_str!("../migrations/001_init.sql"))];

    for &(version, sql) in migrations {
        let applied: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM _migrations WHERE version = $1)")
            .bind(version)
            .fetch_one(&pool)
            .await
            .unwrap_or(false);
        if !applied {
            sqlx::raw_sql(sql).execute(&pool).await?;
            sqlx::query("INSERT INTO _migrations (version) VALUES ($1)")
                .bind(version)
                .execute(&pool)
                .await?;
            tracing::info!(version, "applied migration");
        }
    }
    tracing::info!("migrations applied");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));

    // Concrete provider clients are out of scope (see DESIGN.md); the mock
    // sources below stand in so the engine is runnable end-to-end. A real
    // deployment swaps these for Gmail/Outlook API clients implementing the
    // same `CursorPagedSource`/`OffsetPagedSource` traits.
    let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let registry = ProcessorRegistry::builder()
        .register(
            "gmail",
            Arc::new(GmailProcessor::new(
                Arc::new(MockGmailSource::new(Vec::new())),
                "backups",
                config.default_page_size,
                config.empty_page_streak_limit,
            )),
        )
        .register(
            "outlook",
            Arc::new(OutlookProcessor::new(
                Arc::new(MockOutlookSource::new(Vec::new())),
                "backups",
                config.default_page_size,
                config.empty_page_streak_limit,
                config.worker_pool_size,
            )),
        )
        .build();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(Arc::clone(&store), config.schedule_batch);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        registry,
        object_store,
        config.max_retries,
        config.heartbeat_throttle,
    );
    let liveness = LivenessMonitor::new(Arc::clone(&store), config.heartbeat_stale);

    let scheduler_tick = config.scheduler_tick;
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_tick, scheduler_shutdown).await;
    });

    let dispatcher_tick = config.dispatcher_tick;
    let dispatcher_shutdown = shutdown_rx.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_tick, dispatcher_shutdown).await;
    });

    let liveness_tick = config.liveness_tick;
    let liveness_shutdown = shutdown_rx.clone();
    let liveness_handle = tokio::spawn(async move {
        liveness.run(liveness_tick, liveness_shutdown).await;
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", routes::api_router(store))
        .layer(axum::middleware::from_fn(middleware::security::security_headers))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "4000".into()).parse()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "backup orchestrator listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    serve.await?;

    // The HTTP listener is already down at this point; give the background
    // loops a chance to observe the shutdown signal and finish finalizing
    // whatever task the dispatcher is mid-way through before the runtime
    // drops.
    let _ = tokio::join!(scheduler_handle, dispatcher_handle, liveness_handle);

    Ok(())
}
