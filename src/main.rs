//! game-invite-back binary entrypoint wiring the REST surface, the change feed and the
//! invitation store.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use game_invite_back::{
    config::{AppConfig, StoreBackend},
    dao::{
        invite_store::{InviteStore, memory::MemoryInviteStore},
        storage::StorageError,
    },
    routes,
    services::{expiry_service, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config.clone());

    spawn_store_supervisor(app_state.clone(), config.store).await?;

    if let Some(ttl) = config.pending_ttl {
        tokio::spawn(expiry_service::run(
            app_state.clone(),
            ttl,
            config.expiry_sweep_interval,
        ));
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, store = ?config.store, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the configured backend. Database backends are connected by the storage
/// supervisor so the server can start (degraded) before the database is reachable.
async fn spawn_store_supervisor(state: SharedState, backend: StoreBackend) -> anyhow::Result<()> {
    match backend {
        StoreBackend::Memory => {
            state
                .set_invite_store(Arc::new(MemoryInviteStore::new()))
                .await;
            info!("using in-memory invitation store; rows are lost on restart");
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use game_invite_back::dao::invite_store::mongodb::{MongoConfig, MongoInviteStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await.map_err(StorageError::from)?;
                let store = MongoInviteStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn InviteStore>)
            }));
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use game_invite_back::dao::invite_store::couchdb::{CouchConfig, CouchInviteStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env().map_err(StorageError::from)?;
                let store = CouchInviteStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn InviteStore>)
            }));
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("store backend {other:?} is not compiled into this binary"),
    }

    Ok(())
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
                tracing::warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
