//! HTTP surface for the profile and admin endpoints

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::accounts::Registrar;
use crate::admin::AdminService;
use crate::reconciliation::ReconciliationEngine;
use crate::traits::{ClearanceStorage, LedgerReader};

/// Shared handler state
pub struct AppState<S: ClearanceStorage, L: LedgerReader> {
    pub engine: Arc<ReconciliationEngine<S, L>>,
    pub admin: Arc<AdminService<S>>,
    pub registrar: Arc<Registrar<S>>,
}

impl<S: ClearanceStorage, L: LedgerReader> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            admin: Arc::clone(&self.admin),
            registrar: Arc::clone(&self.registrar),
        }
    }
}

impl<S: ClearanceStorage, L: LedgerReader> AppState<S, L> {
    pub fn new(
        engine: ReconciliationEngine<S, L>,
        admin: AdminService<S>,
        registrar: Registrar<S>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            admin: Arc::new(admin),
            registrar: Arc::new(registrar),
        }
    }
}

/// Full application router with every route under `/api`
pub fn app<S, L>(state: AppState<S, L>) -> Router
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    Router::new().nest("/api", api::router()).with_state(state)
}

/// Bind `addr` and serve until ctrl-c
pub async fn serve(addr: SocketAddr, app: Router) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr}: {e}"))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| format!("serve {addr}: {e}"))
}
