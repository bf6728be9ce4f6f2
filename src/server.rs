use crate::admission::AdmissionRegistry;
use crate::config::Config;
use crate::handlers::{
    export, get_group, get_record, get_record_by_alias, get_record_by_legacy_code, health_check,
    index, list_groups, list_records, quality, AppState,
};
use crate::middleware::{admission_middleware, logging_middleware};
use crate::producer::{DatasetProducer, JsonFileProducer};
use crate::refresh::{RefreshOrchestrator, RefreshScheduler};
use crate::snapshot::SnapshotStore;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the router. Admission runs inside the logging layer so denied
/// requests are still logged.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/quality", get(quality))
        .route("/records", get(list_records))
        .route("/records/:id", get(get_record))
        .route("/records/alias/:code", get(get_record_by_alias))
        .route("/records/legacy/:code", get(get_record_by_legacy_code))
        .route("/groups", get(list_groups))
        .route("/groups/:id", get(get_group))
        .route("/export", get(export))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

async fn not_found(uri: axum::http::Uri) -> crate::Error {
    crate::Error::NotFound(format!("no route for {}", uri.path()))
}

/// Owns the process-wide store, admission registry and background tasks.
pub struct Server {
    config: Config,
    store: Arc<SnapshotStore>,
    admission: AdmissionRegistry,
    scheduler: RefreshScheduler,
}

impl Server {
    pub fn new(config: Config) -> crate::Result<Self> {
        let producer: Arc<dyn DatasetProducer> =
            Arc::new(JsonFileProducer::new(config.data_file.clone()));
        Self::with_producer(config, producer)
    }

    pub fn with_producer(config: Config, producer: Arc<dyn DatasetProducer>) -> crate::Result<Self> {
        config.validate()?;

        let store = Arc::new(SnapshotStore::new());
        let admission = AdmissionRegistry::new(config.bucket_policy());
        let scheduler = RefreshScheduler::new(
            RefreshOrchestrator::new(Arc::clone(&store), producer),
            config.refresh_interval(),
        );

        Ok(Self {
            config,
            store,
            admission,
            scheduler,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        self.admission.start_sweep(self.config.sweep_interval());
        self.scheduler.start();

        let state = AppState::new(
            Arc::clone(&self.store),
            self.admission.clone(),
            self.config.stale_after(),
        );
        let app = create_app(state);

        tracing::info!("refgate server listening on {}", self.config.bind_addr);
        tracing::info!("Health check available at /health");

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        self.scheduler.stop().await;
        self.admission.stop().await;
        tracing::info!("Background tasks stopped");

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
