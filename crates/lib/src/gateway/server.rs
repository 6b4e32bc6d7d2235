//! Gateway HTTP server (single port): public intake/waitlist API plus the admin surface.

use crate::config::{
    self, resolve_admin_credentials, resolve_datastore_url, resolve_service_key, AdminCredentials,
    Config, DatastoreBackend,
};
use crate::gateway::admin;
use crate::gateway::api;
use crate::gateway::error::ApiError;
use crate::gateway::protocol::Health;
use crate::store::{Datastore, MemoryStore, PostgrestClient};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared per-request state. Cloned into every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// None when the datastore is not configured; datastore-backed endpoints then answer 500.
    pub store: Option<Arc<dyn Datastore>>,
    /// When Some, `/admin` and `/api/admin/*` require these Basic credentials.
    pub admin: Option<Arc<AdminCredentials>>,
}

impl GatewayState {
    pub fn new(
        config: Config,
        store: Option<Arc<dyn Datastore>>,
        admin: Option<AdminCredentials>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            admin: admin.map(Arc::new),
        }
    }

    pub(crate) fn store(&self) -> Result<&dyn Datastore, ApiError> {
        self.store.as_deref().ok_or(ApiError::Configuration)
    }
}

/// Open the configured datastore. A PostgREST backend without url or key yields None.
pub fn open_datastore(config: &Config) -> Option<Arc<dyn Datastore>> {
    match config.datastore.backend {
        DatastoreBackend::Memory => Some(Arc::new(MemoryStore::new())),
        DatastoreBackend::Postgrest => {
            match (resolve_datastore_url(config), resolve_service_key(config)) {
                (Some(url), Some(key)) => Some(Arc::new(PostgrestClient::new(&url, key))),
                _ => {
                    log::warn!(
                        "datastore url or key missing (set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY); datastore endpoints will fail"
                    );
                    None
                }
            }
        }
    }
}

/// All gateway routes. Admin routes sit behind the Basic auth layer.
pub fn build_router(state: GatewayState) -> Router {
    let admin_routes = Router::new()
        .route("/admin", get(admin::index))
        .route("/api/admin/metrics", get(admin::metrics))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/signups", get(admin::signups))
        .route("/api/admin/messages", get(admin::messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_basic_auth,
        ));

    Router::new()
        .route("/", get(health_http))
        .route("/api/invoke", post(api::invoke))
        .route("/sms", post(api::sms_webhook))
        .route("/api/events", post(api::events))
        .route("/api/waitlist", post(api::waitlist))
        .route("/api/preview/access", get(api::preview_access))
        .merge(admin_routes)
        .with_state(state)
}

/// Resolve admin credentials (config or ADMIN_USER/ADMIN_PASS) and serve.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    log::debug!("gateway config from {}", config_path.display());
    let admin = resolve_admin_credentials(&config);
    serve_gateway(config, admin).await
}

/// Bind, serve until SIGINT/SIGTERM, then drain in-flight requests.
/// Without `admin`, only a loopback bind is allowed.
pub async fn serve_gateway(config: Config, admin: Option<AdminCredentials>) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if admin.is_none() {
        if !config::is_loopback_bind(&bind) {
            anyhow::bail!(
                "refusing to bind gateway to {} without admin credentials (set gateway.admin.user and gateway.admin.pass or ADMIN_USER and ADMIN_PASS)",
                bind
            );
        }
        log::warn!("admin credentials not configured; admin endpoints are open on {}", bind);
    }

    let store = open_datastore(&config);
    if let Some(ref s) = store {
        log::info!("datastore backend: {}", s.backend());
    }
    let port = config.gateway.port;
    let app = build_router(GatewayState::new(config, store, admin));

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
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
    log::info!("shutdown signal received, draining connections");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        service: "invoke".to_string(),
        port: state.config.gateway.port,
        datastore: state
            .store
            .as_ref()
            .map(|s| s.backend())
            .unwrap_or("unconfigured")
            .to_string(),
    })
}
