use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    dao::invite_store::GuardedWrite,
    error::ServiceError,
    state::{
        SharedState,
        invitation::{Invitation, InviteStatus},
        transitions::{apply_guarded_write, run_bounded},
    },
};

/// Periodically cancel pending invitations older than `ttl`.
///
/// Runs forever; spawn it only when a TTL is configured.
pub async fn run(state: SharedState, ttl: Duration, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        ttl_secs = ttl.as_secs(),
        every_secs = every.as_secs(),
        "invitation expiry enabled"
    );

    loop {
        ticker.tick().await;
        match sweep(&state, ttl).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "expired stale pending invitations"),
            Err(ServiceError::Degraded) => debug!("skipping expiry sweep while degraded"),
            Err(err) => warn!(error = %err, "expiry sweep failed"),
        }
    }
}

/// Cancel every pending invitation created before `now - ttl`, returning how many
/// were actually expired. Invitations resolved concurrently are left as they are.
pub async fn sweep(state: &SharedState, ttl: Duration) -> Result<usize, ServiceError> {
    let store = state.require_invite_store().await?;
    let Some(cutoff) = SystemTime::now().checked_sub(ttl) else {
        return Ok(0);
    };

    let lookup = store.clone();
    let stale =
        run_bounded(state, async move { lookup.list_pending_before(cutoff).await }).await?;

    let mut expired = 0;
    for row in stale {
        let id = row.id;
        match apply_guarded_write(state, store.clone(), id, InviteStatus::Cancelled).await {
            Ok(GuardedWrite::Applied(row)) => {
                let invitation = Invitation::try_from(row)?;
                debug!(%id, inviter = %invitation.inviter_id, "pending invitation expired");
                expired += 1;
            }
            Ok(GuardedWrite::Lost(_) | GuardedWrite::Missing) => {
                debug!(%id, "invitation resolved before it could expire");
            }
            Err(err) => warn!(%id, error = %err, "failed to expire invitation"),
        }
    }

    Ok(expired)
}
