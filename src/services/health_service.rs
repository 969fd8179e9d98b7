use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` or `degraded`, logging store connectivity issues along the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_invite_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "invitation store health check failed");
            }
        }
        Err(_) => warn!("invitation store unavailable (degraded mode)"),
    }

    HealthResponse::new(state.is_degraded().await, state.feed().subscriber_count())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::invite_store::memory::MemoryInviteStore, state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .set_invite_store(Arc::new(MemoryInviteStore::new()))
            .await;
        let _subscriber = state.feed().subscribe();
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.feed_subscribers, 1);
    }
}
