use press_auth::{
    build_router,
    config::{AuthConfig, StoreBackend},
    db,
    services::{Database, LogNotifier, MemoryStore, Notifier, SmtpNotifier, SystemClock},
    utils::Argon2Hasher,
    AppState, Collaborators,
};
use press_core::{
    error::AppError,
    observability::{init_metrics, init_tracing},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store.backend,
        "Starting authentication service"
    );

    let notifier: Arc<dyn Notifier> = match config.smtp.host.as_deref() {
        Some(host) => {
            tracing::info!(host = %host, "SMTP notifier initialized");
            Arc::new(SmtpNotifier::new(&config.smtp, host)?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, notifications are written to the log");
            Arc::new(LogNotifier::new(config.smtp.public_base_url.clone()))
        }
    };

    let collaborators = Collaborators {
        clock: Arc::new(SystemClock),
        hasher: Arc::new(Argon2Hasher::default()),
        notifier,
    };

    let state = match config.store.backend {
        StoreBackend::Postgres => {
            tracing::info!("Initializing database connection pool");
            let pool = db::create_pool(&config.database)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            tracing::info!("Database initialized successfully");

            let database = Database::new(pool);
            let store = Arc::new(database.clone());
            AppState::new(config.clone(), store, collaborators, Some(database))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            AppState::new(
                config.clone(),
                Arc::new(MemoryStore::new()),
                collaborators,
                None,
            )
        }
    };

    state.auth_service.bootstrap().await?;
    tracing::info!("Signing keys and policies bootstrapped");

    if config.janitor_interval_seconds > 0 {
        state.janitor().spawn(std::time::Duration::from_secs(
            config.janitor_interval_seconds,
        ));
        tracing::info!(
            interval_seconds = config.janitor_interval_seconds,
            "Janitor started"
        );
    }

    let app = build_router(state)?;

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
