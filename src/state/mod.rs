//! Shared application state.

mod feed;
/// Invitation domain model and guards.
pub mod invitation;
/// Bounded store calls and guarded writes.
pub mod transitions;

use std::{sync::Arc, time::Duration};

use tokio::sync::{RwLock, watch};

use crate::{config::AppConfig, dao::invite_store::InviteStore, error::ServiceError};

pub use self::feed::FeedHub;

/// Handle to the state shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Central application state holding the invitation store, the change feed and
/// the degraded-mode flag.
pub struct AppState {
    invite_store: RwLock<Option<Arc<dyn InviteStore>>>,
    feed: FeedHub,
    degraded: watch::Sender<bool>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            invite_store: RwLock::new(None),
            feed: FeedHub::new(config.feed_capacity),
            degraded: degraded_tx,
            config,
        })
    }

    /// Build a state with a store already installed (tests, embedded use).
    pub async fn with_store(config: AppConfig, store: Arc<dyn InviteStore>) -> SharedState {
        let state = Self::new(config);
        state.set_invite_store(store).await;
        state
    }

    /// Obtain a handle to the current invitation store, if one is installed.
    pub async fn invite_store(&self) -> Option<Arc<dyn InviteStore>> {
        let guard = self.invite_store.read().await;
        guard.as_ref().cloned()
    }

    /// Return the installed store or fail with [`ServiceError::Degraded`].
    pub async fn require_invite_store(&self) -> Result<Arc<dyn InviteStore>, ServiceError> {
        self.invite_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_invite_store(&self, store: Arc<dyn InviteStore>) {
        {
            let mut guard = self.invite_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_invite_store(&self) {
        {
            let mut guard = self.invite_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Change feed hub carrying every invitation insert and update.
    pub fn feed(&self) -> &FeedHub {
        &self.feed
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Timeout applied to each store round trip of a transition operation.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.config.operation_timeout
    }
}
