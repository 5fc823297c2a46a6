//! Live quiz backend entrypoint wiring REST, WebSocket, the job pipeline and both stores.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        job_journal::{JobJournal, MemoryJobJournal},
        live_store::{LiveStore, MemoryLiveStore},
        session_store::{MemorySessionStore, SessionStore},
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

/// Selects the in-memory stores regardless of the compiled backends.
const STORE_ENV: &str = "LIVE_QUIZ_STORE";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let (sessions, live, journal) = connect_stores(&config).await?;

    let app_state = AppState::with_journal(config, sessions, live, journal);
    tokio::spawn(storage_supervisor::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    info!("server stopped; draining background jobs");
    app_state.jobs().shutdown().await;
    Ok(())
}

type Stores = (Arc<dyn SessionStore>, Arc<dyn LiveStore>, Arc<dyn JobJournal>);

/// Connect the durable and ephemeral stores selected by features and environment. The job
/// journal lives next to the ephemeral state.
async fn connect_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if env::var(STORE_ENV).is_ok_and(|value| value.eq_ignore_ascii_case("memory")) {
        info!("using in-memory stores; pending jobs will not survive a restart");
        return Ok((
            Arc::new(MemorySessionStore::new()),
            memory_live_store(config),
            Arc::new(MemoryJobJournal::new()),
        ));
    }
    let sessions = connect_session_store().await?;
    let (live, journal) = connect_live_store(config).await?;
    Ok((sessions, live, journal))
}

fn memory_live_store(config: &AppConfig) -> Arc<dyn LiveStore> {
    let live = MemoryLiveStore::new(config.state_ttl);
    live.spawn_sweeper(SWEEP_INTERVAL);
    Arc::new(live)
}

#[cfg(feature = "mongo-store")]
async fn connect_session_store() -> anyhow::Result<Arc<dyn SessionStore>> {
    use live_quiz_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let mongo_config = MongoConfig::from_env()
        .await
        .context("parsing MongoDB configuration")?;
    let database = mongo_config.database_name.clone();
    let store = MongoSessionStore::connect(mongo_config)
        .await
        .context("connecting to MongoDB")?;
    info!(%database, "connected to MongoDB");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongo-store"))]
async fn connect_session_store() -> anyhow::Result<Arc<dyn SessionStore>> {
    warn!("MongoDB support not compiled in; sessions are kept in memory");
    Ok(Arc::new(MemorySessionStore::new()))
}

#[cfg(feature = "redis-store")]
async fn connect_live_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LiveStore>, Arc<dyn JobJournal>)> {
    use live_quiz_back::dao::live_store::redis::RedisLiveStore;

    let url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let store = RedisLiveStore::connect(&url, config.state_ttl)
        .await
        .context("connecting to Redis")?;
    info!("connected to Redis");
    let journal = Arc::new(store.job_journal());
    Ok((Arc::new(store), journal))
}

#[cfg(not(feature = "redis-store"))]
async fn connect_live_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LiveStore>, Arc<dyn JobJournal>)> {
    warn!("Redis support not compiled in; live state and pending jobs are kept in memory");
    Ok((memory_live_store(config), Arc::new(MemoryJobJournal::new())))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
