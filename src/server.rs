use crate::config::{Config, StoreBackend};
use crate::error::ThrottlerResult;
use crate::handlers::{health_check, index, not_found, readiness_check, AppState, SharedState};
use crate::middleware::{logging_middleware, throttle_gate};
use crate::record::TrialRecord;
use crate::store::{MemoryStore, RedisStore, SqlStore, TrialStore};
use crate::throttler::Throttler;
use crate::token::JwtDecoder;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router: health probes stay open, every other request goes
/// through the throttle gate, including unknown paths and wrong methods.
///
/// `protected` may be empty. Its fallback is replaced with a JSON 404 so
/// unmatched requests are counted like any other.
pub fn create_app(state: SharedState, protected: Router<SharedState>) -> Router {
    let gated = protected
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), throttle_gate))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .fallback_service(gated)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

/// Routes served behind the gate when nothing else is mounted.
pub fn default_routes() -> Router<SharedState> {
    Router::new().route("/", get(index))
}

pub async fn open_store(config: &Config) -> ThrottlerResult<Arc<dyn TrialStore<TrialRecord>>> {
    let store: Arc<dyn TrialStore<TrialRecord>> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::<TrialRecord>::new()),
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&config.redis_url, &config.redis_key_prefix).await?)
        }
        StoreBackend::Sqlite => {
            let store = SqlStore::connect(&config.database_url, &config.table).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };
    Ok(store)
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        Self::with_protected_routes(config, default_routes()).await
    }

    /// Serve `protected` behind the throttle gate.
    pub async fn with_protected_routes(
        config: Config,
        protected: Router<SharedState>,
    ) -> ThrottlerResult<Self> {
        config.validate()?;

        let store = open_store(&config).await?;
        let decoder = Arc::new(JwtDecoder::new(config.jwt_secret.as_bytes()));
        let throttler = Throttler::new(config.throttle(), store, decoder)?
            .with_store_timeout(config.store_timeout);

        let state = AppState::new(Arc::new(throttler), config.trust_forwarded_headers);

        Ok(Self {
            app: create_app(state, protected),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Trial throttler listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Peer addresses are the identity of anonymous callers.
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %err, "failed to install signal handler");
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
