//! Single task owning a participant's state machine.
//!
//! Feed events, operation results, profile lookups and re-fetches are all messages on
//! one inbox, so dispatch always reads the state that is current when a message is
//! handled.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use rand::Rng;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    client::{
        InviteError,
        api::InviteApi,
        feed::ChangeFeed,
        machine::{Followup, LocalOutcome, ParticipantMachine, ParticipantView},
        profile::{DisplayProfile, ProfileLookup},
    },
    config::RouterConfig,
    state::invitation::{Invitation, InvitationId},
};

/// Completion signal for a message whose effect the sender waits on.
pub(crate) type Ack = Option<oneshot::Sender<()>>;

pub(crate) enum RouterMessage {
    /// Canonical row from the feed or a re-fetch.
    Row { row: Invitation, ack: Ack },
    TrackSent { row: Invitation, ack: Ack },
    Outcome { outcome: LocalOutcome, ack: Ack },
    /// The store does not know this invitation.
    Forget { id: InvitationId, ack: Ack },
    Profile {
        invitation_id: InvitationId,
        profile: DisplayProfile,
    },
    FeedUp { reconnected: bool },
    FeedDown,
    Reset { ack: Ack },
    Shutdown,
}

/// Collaborators of the router.
pub(crate) struct RouterDeps {
    pub api: Arc<dyn InviteApi>,
    pub feed: Arc<dyn ChangeFeed>,
    pub profiles: Arc<dyn ProfileLookup>,
}

/// Spawn the router and its feed pump.
pub(crate) fn spawn(
    machine: ParticipantMachine,
    deps: RouterDeps,
    config: RouterConfig,
) -> (
    mpsc::Sender<RouterMessage>,
    watch::Receiver<ParticipantView>,
    JoinHandle<()>,
) {
    let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
    let (view_tx, view_rx) = watch::channel(machine.view());

    let pump = tokio::spawn(feed_pump(
        deps.feed.clone(),
        inbox_tx.clone(),
        config.clone(),
    ));
    let router = EventRouter {
        machine,
        deps,
        config,
        inbox_tx: inbox_tx.clone(),
        view_tx,
    };
    let task = tokio::spawn(router.run(inbox_rx, pump));

    (inbox_tx, view_rx, task)
}

struct EventRouter {
    machine: ParticipantMachine,
    deps: RouterDeps,
    config: RouterConfig,
    inbox_tx: mpsc::Sender<RouterMessage>,
    view_tx: watch::Sender<ParticipantView>,
}

impl EventRouter {
    async fn run(mut self, mut inbox: mpsc::Receiver<RouterMessage>, pump: JoinHandle<()>) {
        debug!(user = self.machine.user_id(), "event router started");

        while let Some(message) = inbox.recv().await {
            if matches!(message, RouterMessage::Shutdown) {
                break;
            }
            let ack = self.handle(message);
            self.publish();
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }

        pump.abort();
        debug!(user = self.machine.user_id(), "event router stopped");
    }

    fn handle(&mut self, message: RouterMessage) -> Ack {
        match message {
            RouterMessage::Row { row, ack } => {
                let followups = self.machine.apply_row(row);
                self.run_followups(followups);
                ack
            }
            RouterMessage::TrackSent { row, ack } => {
                self.machine.track_sent(row);
                ack
            }
            RouterMessage::Outcome { outcome, ack } => {
                self.machine.apply_outcome(outcome);
                ack
            }
            RouterMessage::Forget { id, ack } => {
                self.machine.forget(id);
                ack
            }
            RouterMessage::Profile {
                invitation_id,
                profile,
            } => {
                self.machine.attach_profile(invitation_id, profile);
                None
            }
            RouterMessage::FeedUp { reconnected } => {
                self.machine.set_feed_connected(true);
                // Anything tracked may have resolved while no stream was open,
                // including before the first subscription succeeded.
                let tracked = self.machine.tracked_ids();
                if self.config.resync_on_reconnect && !tracked.is_empty() {
                    info!(
                        count = tracked.len(),
                        reconnected,
                        "feed subscribed; re-fetching tracked invitations"
                    );
                    for id in tracked {
                        self.spawn_refetch(id);
                    }
                }
                None
            }
            RouterMessage::FeedDown => {
                self.machine.set_feed_connected(false);
                None
            }
            RouterMessage::Reset { ack } => {
                self.machine.reset();
                ack
            }
            RouterMessage::Shutdown => None,
        }
    }

    fn publish(&self) {
        let view = self.machine.view();
        self.view_tx.send_if_modified(|current| {
            if current.version == view.version {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn run_followups(&self, followups: Vec<Followup>) {
        for followup in followups {
            match followup {
                Followup::LookupProfile {
                    invitation_id,
                    inviter_id,
                } => self.spawn_profile_lookup(invitation_id, inviter_id),
            }
        }
    }

    fn spawn_profile_lookup(&self, invitation_id: InvitationId, inviter_id: String) {
        let lookup = self.deps.profiles.display_profile(&inviter_id);
        let limit = self.config.profile_timeout;
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            let profile = match timeout(limit, lookup).await {
                Ok(Ok(profile)) => profile,
                Ok(Err(err)) => {
                    debug!(%invitation_id, error = %err, "profile lookup failed; using placeholder");
                    DisplayProfile::placeholder()
                }
                Err(_) => {
                    debug!(%invitation_id, "profile lookup timed out; using placeholder");
                    DisplayProfile::placeholder()
                }
            };
            let _ = inbox
                .send(RouterMessage::Profile {
                    invitation_id,
                    profile,
                })
                .await;
        });
    }

    fn spawn_refetch(&self, id: InvitationId) {
        let fetch = self.deps.api.get_invite(id);
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            let message = match fetch.await {
                Ok(row) => RouterMessage::Row { row, ack: None },
                Err(InviteError::NotFound(_)) => RouterMessage::Forget { id, ack: None },
                Err(err) => {
                    warn!(%id, error = %err, "re-fetch after feed subscription failed");
                    return;
                }
            };
            let _ = inbox.send(message).await;
        });
    }
}

/// Keep a feed subscription open, re-subscribing with jittered exponential backoff.
async fn feed_pump(
    feed: Arc<dyn ChangeFeed>,
    inbox: mpsc::Sender<RouterMessage>,
    config: RouterConfig,
) {
    let mut failures: u32 = 0;
    let mut connected_before = false;

    loop {
        match feed.subscribe().await {
            Ok(mut stream) => {
                failures = 0;
                let up = RouterMessage::FeedUp {
                    reconnected: connected_before,
                };
                if inbox.send(up).await.is_err() {
                    return;
                }
                connected_before = true;

                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(event) => event,
                        Err(err) => {
                            warn!(error = %err, "change feed interrupted");
                            break;
                        }
                    };

                    let row = match Invitation::try_from(event.row) {
                        Ok(row) => row,
                        Err(err) => {
                            warn!(error = %err, "discarding inconsistent feed row");
                            continue;
                        }
                    };
                    if inbox
                        .send(RouterMessage::Row { row, ack: None })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }

                if inbox.send(RouterMessage::FeedDown).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(error = %err, failures, "change feed subscription failed"),
        }

        let delay = backoff_delay(&config, failures);
        failures = failures.saturating_add(1);
        tokio::select! {
            _ = inbox.closed() => return,
            _ = sleep(delay) => {}
        }
    }
}

/// Exponential delay for the given number of consecutive failures, capped at
/// `max_backoff`, plus up to 10% jitter.
fn backoff_delay(config: &RouterConfig, failures: u32) -> Duration {
    let base = config
        .initial_backoff
        .saturating_mul(2u32.saturating_pow(failures.min(16)))
        .min(config.max_backoff);
    let jitter_ms = (base.as_millis() as f64 * 0.1 * rand::rng().random::<f64>()) as u64;
    base + Duration::from_millis(jitter_ms)
}
