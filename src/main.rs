use axum::extract::DefaultBodyLimit;
use exam_backend::{
    cache,
    config::{get_config, init_config},
    database::pool::{create_pool, migrate},
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(&config.log_format);

    let pool = create_pool().await?;
    migrate(&pool).await?;

    let cache_store = cache::connect(&config.redis_url).await?;
    let app_state = AppState::new(pool, cache_store, config.policy());

    let shutdown = CancellationToken::new();
    let workers = TaskTracker::new();

    {
        let autosave = app_state.autosave_service.clone();
        let stop = shutdown.clone();
        let interval = Duration::from_secs(config.flush_interval_seconds.max(1));
        workers.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = autosave.flush_once().await {
                    tracing::error!(error = %e, "autosave flusher error");
                }
            }
        });
    }

    {
        let attempts = app_state.attempt_service.clone();
        let stop = shutdown.clone();
        let interval = Duration::from_secs(config.sweep_interval_seconds.max(1));
        workers.spawn(async move {
            loop {
                if let Err(e) = attempts.sweep_expired(chrono::Utc::now()).await {
                    tracing::error!(error = %e, "deadline sweeper error");
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
    workers.close();

    let app = routes::api_router(app_state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    workers.wait().await;
    app_state.presence_service.timers().cancel_all();
    match app_state.autosave_service.flush_once().await {
        Ok(flushed) => info!(flushed, "final autosave flush complete"),
        Err(e) => tracing::error!(error = %e, "final autosave flush failed"),
    }
    app_state.pool.close().await;
    info!("shutdown complete");

    Ok(())
}
