use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future::BoxFuture};
use game_invite_back::{
    client::{
        InviteClient, InviteError,
        api::{InviteApi, LocalInviteApi},
        feed::{ChangeFeed, ChangeStream, LocalChangeFeed},
        machine::{InviteePhase, InviterPhase, ParticipantView},
        profile::{DisplayProfile, ProfileDirectory, ProfileError, ProfileLookup},
    },
    config::{AppConfig, RouterConfig},
    dao::invite_store::memory::MemoryInviteStore,
    dto::{
        feed::ChangeEvent,
        invite::{CreateInviteRequest, InviteStatusDto},
    },
    error::ServiceError,
    services::invite_service,
    state::{
        AppState, SharedState,
        invitation::{Invitation, InviteStatus},
    },
};
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(5);

async fn server() -> SharedState {
    AppState::with_store(AppConfig::default(), Arc::new(MemoryInviteStore::new())).await
}

fn router_config() -> RouterConfig {
    RouterConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        profile_timeout: Duration::from_millis(200),
        ..RouterConfig::default()
    }
}

fn profiles() -> Arc<ProfileDirectory> {
    let directory = ProfileDirectory::new();
    directory.insert(
        "alice",
        DisplayProfile {
            name: "Alice".into(),
            avatar_url: None,
        },
    );
    Arc::new(directory)
}

async fn client_with_feed(
    state: &SharedState,
    user: &str,
    feed: Arc<dyn ChangeFeed>,
) -> InviteClient {
    let client = InviteClient::start(
        user,
        Arc::new(LocalInviteApi::new(state.clone())),
        feed,
        profiles(),
        router_config(),
    );
    within(client.wait_for(|view| view.feed_connected)).await;
    client
}

async fn client_with_profiles(
    state: &SharedState,
    user: &str,
    profiles: Arc<dyn ProfileLookup>,
    config: RouterConfig,
) -> InviteClient {
    let client = InviteClient::start(
        user,
        Arc::new(LocalInviteApi::new(state.clone())),
        Arc::new(LocalChangeFeed::new(state.clone())),
        profiles,
        config,
    );
    within(client.wait_for(|view| view.feed_connected)).await;
    client
}

async fn client(state: &SharedState, user: &str) -> InviteClient {
    client_with_feed(state, user, Arc::new(LocalChangeFeed::new(state.clone()))).await
}

async fn within<T, E: std::fmt::Debug>(future: impl Future<Output = Result<T, E>>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
        .expect("wait failed")
}

async fn create(state: &SharedState, inviter: &str, invitee: &str) -> Invitation {
    let record = invite_service::create_invite(
        state,
        CreateInviteRequest {
            inviter_id: inviter.into(),
            invitee_id: invitee.into(),
        },
    )
    .await
    .unwrap();
    Invitation::try_from(record).unwrap()
}

fn presented_id(view: &ParticipantView) -> Option<uuid::Uuid> {
    match &view.invitee {
        InviteePhase::InvitePresented(incoming) => Some(incoming.invitation.id),
        _ => None,
    }
}

#[tokio::test]
async fn create_then_get_is_pending_without_session() {
    let state = server().await;
    let invitation = create(&state, "alice", "bob").await;

    let row = invite_service::get_invite(&state, invitation.id).await.unwrap();
    assert_eq!(row.status, InviteStatusDto::Pending);
    assert_eq!(row.session_id, None);
    assert_eq!(row.inviter_id, "alice");
    assert_eq!(row.invitee_id, "bob");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolutions_record_exactly_one_terminal_status() {
    let state = server().await;

    for _ in 0..25 {
        let invitation = create(&state, "alice", "bob").await;
        let id = invitation.id;

        let accept = tokio::spawn({
            let state = state.clone();
            async move { invite_service::accept_invite(&state, id, "bob").await.map(Some) }
        });
        let decline = tokio::spawn({
            let state = state.clone();
            async move { invite_service::decline_invite(&state, id, "bob").await.map(|_| None) }
        });
        let cancel = tokio::spawn({
            let state = state.clone();
            async move { invite_service::cancel_invite(&state, id, "alice").await.map(|_| None) }
        });

        let results = [
            accept.await.unwrap(),
            decline.await.unwrap(),
            cancel.await.unwrap(),
        ];
        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);
        for result in &results {
            if let Err(err) = result {
                assert!(matches!(err, ServiceError::AlreadyResolved(_)), "{err:?}");
            }
        }

        let row = invite_service::get_invite(&state, id).await.unwrap();
        match &results[0] {
            Ok(Some(session)) => {
                assert_eq!(row.status, InviteStatusDto::Accepted);
                assert_eq!(row.session_id, Some(*session));
            }
            _ => {
                assert_ne!(row.status, InviteStatusDto::Pending);
                assert_eq!(row.session_id, None);
            }
        }
    }
}

#[tokio::test]
async fn non_invitee_can_neither_accept_nor_decline() {
    let state = server().await;
    let invitation = create(&state, "alice", "bob").await;

    for user in ["alice", "mallory"] {
        let accept = invite_service::accept_invite(&state, invitation.id, user).await;
        assert!(matches!(accept, Err(ServiceError::NotAuthorized(_))));
        let decline = invite_service::decline_invite(&state, invitation.id, user).await;
        assert!(matches!(decline, Err(ServiceError::NotAuthorized(_))));
    }

    let row = invite_service::get_invite(&state, invitation.id).await.unwrap();
    assert_eq!(row.status, InviteStatusDto::Pending);
}

#[tokio::test]
async fn happy_path_reaches_session_on_both_sides() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;

    let sent = alice.send_invite("bob").await.unwrap();
    assert!(matches!(alice.view().inviter, InviterPhase::AwaitingResponse(_)));
    assert!(alice.view().has_pending_invite_to("bob"));

    let presented = within(bob.wait_for(|view| {
        matches!(&view.invitee, InviteePhase::InvitePresented(incoming) if incoming.inviter_profile.is_some())
    }))
    .await;
    match presented.invitee {
        InviteePhase::InvitePresented(incoming) => {
            assert_eq!(incoming.invitation.id, sent.id);
            assert_eq!(incoming.inviter_profile.unwrap().name, "Alice");
        }
        other => panic!("unexpected invitee phase {other:?}"),
    }

    let session = bob.accept(sent.id).await.unwrap();
    assert_eq!(bob.view().session_id(), Some(session));

    let row = invite_service::get_invite(&state, sent.id).await.unwrap();
    assert_eq!(row.status, InviteStatusDto::Accepted);
    assert_eq!(row.session_id, Some(session));

    let view = within(alice.wait_for(|view| view.session_id().is_some())).await;
    assert_eq!(
        view.inviter,
        InviterPhase::SessionReady {
            invitation_id: sent.id,
            session_id: session
        }
    );
    assert!(view.pending_targets.is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_accept_race_never_shows_cancelled_after_accept_won() {
    let state = server().await;
    let alice = Arc::new(client(&state, "alice").await);
    let bob = Arc::new(client(&state, "bob").await);

    let sent = alice.send_invite("bob").await.unwrap();
    within(bob.wait_for(|view| presented_id(view) == Some(sent.id))).await;

    let cancel = tokio::spawn({
        let alice = alice.clone();
        async move { alice.cancel(sent.id).await }
    });
    let accept = tokio::spawn({
        let bob = bob.clone();
        async move { bob.accept(sent.id).await }
    });
    let cancel = cancel.await.unwrap();
    let accept = accept.await.unwrap();

    match (cancel, accept) {
        (Err(InviteError::AlreadyResolved(_)), Ok(session)) => {
            let view = within(alice.wait_for(|view| view.session_id().is_some())).await;
            assert_eq!(view.session_id(), Some(session));
            assert!(!matches!(view.inviter, InviterPhase::Resolved { .. }));
        }
        (Ok(()), Err(InviteError::AlreadyResolved(_))) => {
            let view = alice.view();
            assert!(matches!(view.inviter, InviterPhase::Resolved { .. }));
            let bob_view = within(bob.wait_for(|view| {
                matches!(view.invitee, InviteePhase::Dismissed { .. })
            }))
            .await;
            assert_eq!(bob_view.session_id(), None);
        }
        other => panic!("exactly one side must win: {other:?}"),
    }
}

#[tokio::test]
async fn accepting_a_cancelled_invite_is_stale() {
    let state = server().await;
    let alice = client(&state, "alice").await;
    let bob = client(&state, "bob").await;

    let sent = alice.send_invite("bob").await.unwrap();
    within(bob.wait_for(|view| presented_id(view) == Some(sent.id))).await;
    alice.cancel(sent.id).await.unwrap();

    let err = bob.accept(sent.id).await.unwrap_err();
    assert!(matches!(err, InviteError::AlreadyResolved(_)));
    assert_eq!(err.user_message(), "This invite was already handled.");

    let row = invite_service::get_invite(&state, sent.id).await.unwrap();
    assert_eq!(row.status, InviteStatusDto::Cancelled);
    assert_eq!(row.session_id, None);
    assert_eq!(
        bob.view().invitee,
        InviteePhase::Dismissed {
            invitation_id: sent.id
        }
    );
}

#[tokio::test]
async fn duplicate_feed_events_leave_the_view_unchanged() {
    let state = server().await;
    let bob = client(&state, "bob").await;
    let invitation = Invitation::new_pending("alice", "bob");
    let insert = ChangeEvent::insert(invitation.clone());

    state.feed().publish(insert.clone());
    let presented = within(bob.wait_for(|view| {
        matches!(&view.invitee, InviteePhase::InvitePresented(incoming) if incoming.inviter_profile.is_some())
    }))
    .await;

    state.feed().publish(insert.clone());
    state.feed().publish(insert);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bob.view(), presented);

    let update = ChangeEvent::update(
        invitation
            .clone()
            .resolved(InviteStatus::Cancelled, std::time::SystemTime::now()),
    );
    state.feed().publish(update.clone());
    let dismissed =
        within(bob.wait_for(|view| matches!(view.invitee, InviteePhase::Dismissed { .. }))).await;
    state.feed().publish(update);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bob.view(), dismissed);
}

#[tokio::test]
async fn unknown_invitation_clears_nothing_and_reports_not_found() {
    let state = server().await;
    let bob = client(&state, "bob").await;

    let err = bob.decline(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, InviteError::NotFound(_)));
    assert_eq!(bob.view().invitee, InviteePhase::Idle);
}

#[tokio::test]
async fn reset_clears_views_and_later_events_are_ignored() {
    let state = server().await;
    let alice = client(&state, "alice").await;

    let sent = alice.send_invite("bob").await.unwrap();
    alice.reset().await;
    let cleared = alice.view();
    assert_eq!(cleared.inviter, InviterPhase::Idle);
    assert!(cleared.pending_targets.is_empty());

    invite_service::accept_invite(&state, sent.id, "bob")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.view().inviter, InviterPhase::Idle);
}

/// Local feed that can be cut and kept offline on demand.
struct GatedFeed {
    inner: LocalChangeFeed,
    offline: Arc<AtomicBool>,
    cut: Arc<Notify>,
}

impl ChangeFeed for GatedFeed {
    fn subscribe(&self) -> BoxFuture<'static, Result<ChangeStream, InviteError>> {
        if self.offline.load(Ordering::SeqCst) {
            return Box::pin(async { Err(InviteError::Transport("offline".into())) });
        }
        let inner = self.inner.subscribe();
        let cut = self.cut.clone();
        Box::pin(async move {
            let stream = inner.await?;
            Ok(stream
                .take_until(async move { cut.notified().await })
                .boxed())
        })
    }
}

#[tokio::test]
async fn reconnect_resync_catches_resolution_missed_while_offline() {
    let state = server().await;
    let offline = Arc::new(AtomicBool::new(false));
    let cut = Arc::new(Notify::new());
    let feed = GatedFeed {
        inner: LocalChangeFeed::new(state.clone()),
        offline: offline.clone(),
        cut: cut.clone(),
    };
    let alice = client_with_feed(&state, "alice", Arc::new(feed)).await;

    let sent = alice.send_invite("bob").await.unwrap();

    offline.store(true, Ordering::SeqCst);
    cut.notify_waiters();
    within(alice.wait_for(|view| !view.feed_connected)).await;

    let session = invite_service::accept_invite(&state, sent.id, "bob")
        .await
        .unwrap();
    assert!(matches!(alice.view().inviter, InviterPhase::AwaitingResponse(_)));

    offline.store(false, Ordering::SeqCst);
    let view = within(alice.wait_for(|view| view.session_id().is_some())).await;
    assert_eq!(view.session_id(), Some(session));
    assert!(view.feed_connected);
}

#[tokio::test]
async fn first_subscription_catches_resolution_of_invite_sent_before_feed_came_up() {
    let state = server().await;
    let offline = Arc::new(AtomicBool::new(true));
    let feed = GatedFeed {
        inner: LocalChangeFeed::new(state.clone()),
        offline: offline.clone(),
        cut: Arc::new(Notify::new()),
    };
    let alice = InviteClient::start(
        "alice",
        Arc::new(LocalInviteApi::new(state.clone())),
        Arc::new(feed),
        profiles(),
        router_config(),
    );
    assert!(!alice.view().feed_connected);

    let sent = alice.send_invite("bob").await.unwrap();
    let session = invite_service::accept_invite(&state, sent.id, "bob")
        .await
        .unwrap();
    assert!(matches!(alice.view().inviter, InviterPhase::AwaitingResponse(_)));

    offline.store(false, Ordering::SeqCst);
    let view = within(alice.wait_for(|view| view.session_id().is_some())).await;
    assert_eq!(
        view.inviter,
        InviterPhase::SessionReady {
            invitation_id: sent.id,
            session_id: session
        }
    );
    assert!(view.feed_connected);
    assert!(view.pending_targets.is_empty());

    alice.shutdown().await;
}

#[tokio::test]
async fn local_api_maps_guard_failures() {
    let state = server().await;
    let api = LocalInviteApi::new(state.clone());
    let invitation = api.create_invite("alice".into(), "bob".into()).await.unwrap();

    assert!(matches!(
        api.cancel_invite(invitation.id, "bob".into()).await,
        Err(InviteError::NotAuthorized(_))
    ));
    api.decline_invite(invitation.id, "bob".into()).await.unwrap();
    assert!(matches!(
        api.cancel_invite(invitation.id, "alice".into()).await,
        Err(InviteError::AlreadyResolved(_))
    ));
    assert!(matches!(
        api.create_invite("alice".into(), "alice".into()).await,
        Err(InviteError::InvalidInput(_))
    ));
    assert_eq!(
        api.get_invite(invitation.id).await.unwrap().status,
        InviteStatus::Rejected
    );
}

fn presented_profile(view: &ParticipantView) -> Option<Option<DisplayProfile>> {
    match &view.invitee {
        InviteePhase::InvitePresented(incoming) => Some(incoming.inviter_profile.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn unknown_inviter_is_presented_with_placeholder_profile() {
    let state = server().await;
    let bob = client(&state, "bob").await;

    let invitation = create(&state, "carol", "bob").await;
    within(bob.wait_for(|view| presented_id(view) == Some(invitation.id))).await;

    let view = within(bob.wait_for(|view| {
        matches!(presented_profile(view), Some(Some(_)))
    }))
    .await;
    assert_eq!(
        presented_profile(&view),
        Some(Some(DisplayProfile::placeholder()))
    );

    let session = bob.accept(invitation.id).await.unwrap();
    assert_eq!(bob.view().session_id(), Some(session));
}

/// Profile source whose lookups never complete.
struct StalledProfiles;

impl ProfileLookup for StalledProfiles {
    fn display_profile(
        &self,
        _user_id: &str,
    ) -> BoxFuture<'static, Result<DisplayProfile, ProfileError>> {
        Box::pin(futures::future::pending())
    }
}

#[tokio::test]
async fn stalled_profile_lookup_does_not_block_the_invite() {
    let state = server().await;
    let config = RouterConfig {
        profile_timeout: Duration::from_millis(300),
        ..router_config()
    };
    let bob = client_with_profiles(&state, "bob", Arc::new(StalledProfiles), config).await;

    let invitation = create(&state, "alice", "bob").await;
    let presented =
        within(bob.wait_for(|view| presented_id(view) == Some(invitation.id))).await;
    assert_eq!(presented_profile(&presented), Some(None));

    let decorated = within(bob.wait_for(|view| {
        matches!(presented_profile(view), Some(Some(_)))
    }))
    .await;
    assert_eq!(
        presented_profile(&decorated),
        Some(Some(DisplayProfile::placeholder()))
    );
    assert_eq!(presented_id(&decorated), Some(invitation.id));
}
