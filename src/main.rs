use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kintercut::analytics::{ClickRecorder, GeoResolver};
use kintercut::api::{self, AppState};
use kintercut::auth::{AuthService, LoginRateLimiter};
use kintercut::config::{Config, DatabaseBackend, LogFormat};
use kintercut::links::LinkService;
use kintercut::redirect::{self, RedirectState};
use kintercut::storage::{PostgresStorage, SqliteStorage, Storage};

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(600);
/// Upper bound on draining queued clicks at exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::from_env()?);

    let config = Config::from_env()?;
    config.validate()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await.context("Failed to initialize database schema")?;
    info!("Database initialized successfully");

    let proxy_config = Arc::new(config.analytics.clone());

    let geo = GeoResolver::from_config(&config.analytics)?;
    let recorder = ClickRecorder::spawn(
        Arc::clone(&storage),
        geo,
        config.analytics.click_queue_capacity,
        config.analytics.click_worker_concurrency,
    );
    info!(
        queue_capacity = config.analytics.click_queue_capacity,
        concurrency = config.analytics.click_worker_concurrency,
        "Click recorder started"
    );

    let links = Arc::new(LinkService::new(
        Arc::clone(&storage),
        config.links.public_ttl_secs,
        &config.base_url,
    ));
    let auth = Arc::new(AuthService::new(config.auth.clone(), Arc::clone(&storage)));

    let limiter = LoginRateLimiter::new(config.auth.login_max_attempts, config.auth.login_window());
    let prune_limiter = limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            prune_limiter.prune();
        }
    });

    let api_router = api::create_api_router(
        Arc::new(AppState {
            links: Arc::clone(&links),
            auth,
            storage: Arc::clone(&storage),
            proxy_config: Arc::clone(&proxy_config),
        }),
        limiter,
        &config.cors_origins(),
    );
    let redirect_router = redirect::create_redirect_router(Arc::new(RedirectState {
        links,
        recorder: recorder.clone(),
        proxy_config,
        public_ttl: Duration::from_secs(config.links.public_ttl_secs as u64),
    }));

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {api_addr}"))?;
    info!("API server listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("Failed to bind redirect server to {redirect_addr}"))?;
    info!("Redirect server listening on http://{}", redirect_addr);
    info!("Short links are served under {}", config.base_url);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Run both servers concurrently
    tokio::try_join!(
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
        .into_future(),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .into_future(),
    )?;

    info!("Servers stopped, draining click queue...");
    if recorder.shutdown_within(SHUTDOWN_TIMEOUT).await {
        info!("Shutdown complete");
    }

    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolve on Ctrl-C or SIGTERM. A signal that cannot be registered is logged
/// and ignored so the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
