//! Per-participant invitation state, re-derived from canonical rows.
//!
//! The machine never advances on the mere fact that a request was sent: only an
//! authoritative operation result or a row read from the store (pushed by the feed or
//! re-fetched) moves it. Rows may arrive late, twice or out of order, so every row is
//! checked against the latest known row of the same invitation before it is applied.

use std::time::SystemTime;

use indexmap::IndexMap;

use crate::{
    client::profile::DisplayProfile,
    state::invitation::{Invitation, InvitationId, InviteStatus, SessionId, UserId},
};

/// How a sent invitation ended without producing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedOutcome {
    /// The invitee declined.
    Rejected,
    /// The invitation was withdrawn or expired.
    Cancelled,
}

/// Inviter side of the local user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InviterPhase {
    /// No sent invitation on screen.
    #[default]
    Idle,
    /// Waiting for the invitee; holds the latest known row.
    AwaitingResponse(Invitation),
    /// The invitee accepted; both sides join `session_id`.
    SessionReady {
        /// Accepted invitation.
        invitation_id: InvitationId,
        /// Session to join.
        session_id: SessionId,
    },
    /// The invitation closed without a session.
    Resolved {
        /// Closed invitation.
        invitation_id: InvitationId,
        /// Whether it was declined or withdrawn.
        outcome: ClosedOutcome,
    },
}

/// Invitation presented to the local user, decorated with the inviter's profile
/// once the lookup completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingInvite {
    /// Latest known row of the invitation.
    pub invitation: Invitation,
    /// `None` until the lookup settles; a placeholder if it failed.
    pub inviter_profile: Option<DisplayProfile>,
}

/// Invitee side of the local user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InviteePhase {
    /// Nothing presented.
    #[default]
    Idle,
    /// A pending invitation awaits the local user's answer.
    InvitePresented(IncomingInvite),
    /// The local user accepted.
    SessionReady {
        /// Accepted invitation.
        invitation_id: InvitationId,
        /// Session to join.
        session_id: SessionId,
    },
    /// The presented invitation was declined or withdrawn.
    Dismissed {
        /// Closed invitation.
        invitation_id: InvitationId,
    },
}

/// Snapshot handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantView {
    /// Owner of the view.
    pub user_id: UserId,
    /// Sent-invitation side.
    pub inviter: InviterPhase,
    /// Incoming-invitation side.
    pub invitee: InviteePhase,
    /// Invitees the local user has a pending sent invitation toward.
    pub pending_targets: Vec<UserId>,
    /// Whether the change feed is currently subscribed.
    pub feed_connected: bool,
    /// Bumped on every observable change.
    pub version: u64,
}

impl ParticipantView {
    /// Session the local user ended up in, on either side.
    pub fn session_id(&self) -> Option<SessionId> {
        match (&self.inviter, &self.invitee) {
            (InviterPhase::SessionReady { session_id, .. }, _)
            | (_, InviteePhase::SessionReady { session_id, .. }) => Some(*session_id),
            _ => None,
        }
    }

    /// Whether a pending sent invitation toward `user` exists.
    pub fn has_pending_invite_to(&self, user: &str) -> bool {
        self.pending_targets.iter().any(|target| target == user)
    }
}

/// Result of one of the local user's own operations, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    /// The local accept won.
    Accepted {
        /// Accepted invitation.
        invitation_id: InvitationId,
        /// Allocated session.
        session_id: SessionId,
    },
    /// The local decline won.
    Declined(InvitationId),
    /// The local cancel won.
    Cancelled(InvitationId),
}

/// Work the owner of the machine has to carry out after applying a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Decorate a freshly presented invitation.
    LookupProfile {
        /// Presented invitation.
        invitation_id: InvitationId,
        /// Whose profile to fetch.
        inviter_id: UserId,
    },
}

/// Explicit state container of one participant.
pub struct ParticipantMachine {
    user_id: UserId,
    inviter: InviterPhase,
    invitee: InviteePhase,
    pending_targets: IndexMap<InvitationId, UserId>,
    history: IndexMap<InvitationId, Invitation>,
    history_capacity: usize,
    feed_connected: bool,
    version: u64,
}

impl ParticipantMachine {
    /// Empty machine remembering at most `history_capacity` untracked rows.
    pub fn new(user_id: impl Into<UserId>, history_capacity: usize) -> Self {
        Self {
            user_id: user_id.into(),
            inviter: InviterPhase::Idle,
            invitee: InviteePhase::Idle,
            pending_targets: IndexMap::new(),
            history: IndexMap::new(),
            history_capacity: history_capacity.max(1),
            feed_connected: false,
            version: 0,
        }
    }

    /// Owner of the machine.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current version of the view.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Snapshot of the visible state.
    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            user_id: self.user_id.clone(),
            inviter: self.inviter.clone(),
            invitee: self.invitee.clone(),
            pending_targets: self.pending_targets.values().cloned().collect(),
            feed_connected: self.feed_connected,
            version: self.version,
        }
    }

    /// Apply a canonical row from the feed or a re-fetch.
    ///
    /// Rows not involving the local user are ignored; so are rows that would move
    /// an invitation back to `Pending`.
    pub fn apply_row(&mut self, row: Invitation) -> Vec<Followup> {
        if !self.involves(&row) {
            return Vec::new();
        }

        self.observed(|machine| {
            let row = machine.remember(row);
            machine.reconcile_sent(&row);
            machine.reconcile_incoming(&row).into_iter().collect()
        })
    }

    /// Start tracking an invitation the local user just sent.
    ///
    /// `provisional` is the copy returned by the create call; whatever the store says
    /// later replaces it wholesale.
    pub fn track_sent(&mut self, provisional: Invitation) {
        if provisional.inviter_id != self.user_id {
            return;
        }

        self.observed(|machine| {
            let row = machine.remember(provisional);
            if !row.status.is_terminal() {
                machine
                    .pending_targets
                    .insert(row.id, row.invitee_id.clone());
            }
            machine.inviter = InviterPhase::AwaitingResponse(row.clone());
            machine.reconcile_sent(&row);
        });
    }

    /// Apply the authoritative result of one of the local user's operations.
    pub fn apply_outcome(&mut self, outcome: LocalOutcome) {
        self.observed(|machine| match outcome {
            LocalOutcome::Accepted {
                invitation_id,
                session_id,
            } => {
                machine.record_status(invitation_id, InviteStatus::Accepted(session_id));
                machine.invitee = InviteePhase::SessionReady {
                    invitation_id,
                    session_id,
                };
            }
            LocalOutcome::Declined(invitation_id) => {
                machine.record_status(invitation_id, InviteStatus::Rejected);
                if machine.presented_id() == Some(invitation_id) {
                    machine.invitee = InviteePhase::Dismissed { invitation_id };
                }
            }
            LocalOutcome::Cancelled(invitation_id) => {
                machine.record_status(invitation_id, InviteStatus::Cancelled);
                machine.pending_targets.shift_remove(&invitation_id);
                if machine.awaited_id() == Some(invitation_id) {
                    machine.inviter = InviterPhase::Resolved {
                        invitation_id,
                        outcome: ClosedOutcome::Cancelled,
                    };
                }
            }
        });
    }

    /// Drop every view of an invitation the store no longer knows.
    pub fn forget(&mut self, invitation_id: InvitationId) {
        self.observed(|machine| {
            machine.pending_targets.shift_remove(&invitation_id);
            machine.history.shift_remove(&invitation_id);
            if machine.awaited_id() == Some(invitation_id) {
                machine.inviter = InviterPhase::Idle;
            }
            if machine.presented_id() == Some(invitation_id) {
                machine.invitee = InviteePhase::Idle;
            }
        });
    }

    /// Attach the inviter profile to the presented invitation, if it is still shown.
    pub fn attach_profile(&mut self, invitation_id: InvitationId, profile: DisplayProfile) {
        self.observed(|machine| {
            if let InviteePhase::InvitePresented(incoming) = &mut machine.invitee {
                if incoming.invitation.id == invitation_id {
                    incoming.inviter_profile = Some(profile);
                }
            }
        });
    }

    /// Navigation-away trigger: clear every view.
    ///
    /// The row history survives so late events for resolved invitations stay inert.
    pub fn reset(&mut self) {
        self.observed(|machine| {
            machine.inviter = InviterPhase::Idle;
            machine.invitee = InviteePhase::Idle;
            machine.pending_targets.clear();
        });
    }

    /// Record whether the change feed is subscribed.
    pub fn set_feed_connected(&mut self, connected: bool) {
        self.observed(|machine| machine.feed_connected = connected);
    }

    /// Invitations whose view depends on a row that may have changed unseen.
    pub fn tracked_ids(&self) -> Vec<InvitationId> {
        let mut ids: Vec<InvitationId> = self.pending_targets.keys().copied().collect();
        for id in [self.awaited_id(), self.presented_id()].into_iter().flatten() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn involves(&self, row: &Invitation) -> bool {
        row.inviter_id == self.user_id || row.invitee_id == self.user_id
    }

    fn awaited_id(&self) -> Option<InvitationId> {
        match &self.inviter {
            InviterPhase::AwaitingResponse(row) => Some(row.id),
            _ => None,
        }
    }

    fn presented_id(&self) -> Option<InvitationId> {
        match &self.invitee {
            InviteePhase::InvitePresented(incoming) => Some(incoming.invitation.id),
            _ => None,
        }
    }

    /// Merge `row` into the history and return the row that is now authoritative.
    fn remember(&mut self, row: Invitation) -> Invitation {
        if let Some(known) = self.history.get(&row.id) {
            if known.status.is_terminal() && !row.status.is_terminal() {
                return known.clone();
            }
        }

        self.history.shift_remove(&row.id);
        self.history.insert(row.id, row.clone());
        self.evict_overflow(row.id);
        row
    }

    /// Trim the history back to capacity.
    ///
    /// Rows backing a visible phase and `keep` are never evicted. Untracked pending
    /// rows go first: a forgotten terminal row would let a late `Pending` redelivery
    /// present a resolved invitation again.
    fn evict_overflow(&mut self, keep: InvitationId) {
        let tracked = self.tracked_ids();
        let evictable = |id: &InvitationId| *id != keep && !tracked.contains(id);

        while self.history.len() > self.history_capacity {
            let victim = self
                .history
                .iter()
                .position(|(id, row)| evictable(id) && !row.status.is_terminal())
                .or_else(|| self.history.keys().position(|id| evictable(id)));
            match victim {
                Some(index) => {
                    self.history.shift_remove_index(index);
                }
                // Everything left is on screen; let the history overflow.
                None => break,
            }
        }
    }

    fn record_status(&mut self, invitation_id: InvitationId, status: InviteStatus) {
        if let Some(known) = self.history.get(&invitation_id).cloned() {
            self.remember(known.resolved(status, SystemTime::now()));
        }
    }

    fn reconcile_sent(&mut self, row: &Invitation) {
        if row.inviter_id != self.user_id {
            return;
        }
        if row.status.is_terminal() {
            self.pending_targets.shift_remove(&row.id);
        }
        if self.awaited_id() != Some(row.id) {
            return;
        }

        self.inviter = match row.status {
            InviteStatus::Pending => InviterPhase::AwaitingResponse(row.clone()),
            InviteStatus::Accepted(session_id) => InviterPhase::SessionReady {
                invitation_id: row.id,
                session_id,
            },
            InviteStatus::Rejected => InviterPhase::Resolved {
                invitation_id: row.id,
                outcome: ClosedOutcome::Rejected,
            },
            InviteStatus::Cancelled => InviterPhase::Resolved {
                invitation_id: row.id,
                outcome: ClosedOutcome::Cancelled,
            },
        };
    }

    fn reconcile_incoming(&mut self, row: &Invitation) -> Option<Followup> {
        if row.invitee_id != self.user_id {
            return None;
        }

        let presented = match &self.invitee {
            InviteePhase::InvitePresented(incoming) => {
                Some((incoming.invitation.id, incoming.invitation.created_at))
            }
            _ => None,
        };

        match row.status {
            InviteStatus::Pending => {
                if let Some((id, created_at)) = presented {
                    if id == row.id {
                        if let InviteePhase::InvitePresented(incoming) = &mut self.invitee {
                            incoming.invitation = row.clone();
                        }
                        return None;
                    }
                    // An older invitation never displaces a newer one.
                    if created_at > row.created_at {
                        return None;
                    }
                }

                self.invitee = InviteePhase::InvitePresented(IncomingInvite {
                    invitation: row.clone(),
                    inviter_profile: None,
                });
                Some(Followup::LookupProfile {
                    invitation_id: row.id,
                    inviter_id: row.inviter_id.clone(),
                })
            }
            InviteStatus::Accepted(session_id) if presented.map(|(id, _)| id) == Some(row.id) => {
                self.invitee = InviteePhase::SessionReady {
                    invitation_id: row.id,
                    session_id,
                };
                None
            }
            InviteStatus::Rejected | InviteStatus::Cancelled
                if presented.map(|(id, _)| id) == Some(row.id) =>
            {
                self.invitee = InviteePhase::Dismissed {
                    invitation_id: row.id,
                };
                None
            }
            // Terminal rows for invitations no longer on screen.
            _ => None,
        }
    }

    /// Run `change` and bump the version if the visible state moved.
    fn observed<R>(&mut self, change: impl FnOnce(&mut Self) -> R) -> R {
        let before = self.fingerprint();
        let result = change(self);
        if self.fingerprint() != before {
            self.version += 1;
        }
        result
    }

    fn fingerprint(&self) -> (InviterPhase, InviteePhase, Vec<InvitationId>, bool) {
        (
            self.inviter.clone(),
            self.invitee.clone(),
            self.pending_targets.keys().copied().collect(),
            self.feed_connected,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn invite(inviter: &str, invitee: &str) -> Invitation {
        Invitation::new_pending(inviter, invitee)
    }

    fn accepted(row: &Invitation) -> (Invitation, SessionId) {
        let session = Uuid::new_v4();
        let row = row
            .clone()
            .resolved(InviteStatus::Accepted(session), SystemTime::now());
        (row, session)
    }

    #[test]
    fn inviter_reaches_session_ready_from_update() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());
        assert!(alice.view().has_pending_invite_to("bob"));

        let (row, session) = accepted(&sent);
        alice.apply_row(row);

        let view = alice.view();
        assert_eq!(
            view.inviter,
            InviterPhase::SessionReady {
                invitation_id: sent.id,
                session_id: session
            }
        );
        assert!(view.pending_targets.is_empty());
        assert_eq!(view.session_id(), Some(session));
    }

    #[test]
    fn applying_the_same_update_twice_is_a_no_op() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());
        let (row, _) = accepted(&sent);

        alice.apply_row(row.clone());
        let once = alice.view();
        alice.apply_row(row);
        assert_eq!(alice.view(), once);
    }

    #[test]
    fn late_pending_row_does_not_resurrect_resolved_invite() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());
        let rejected = sent
            .clone()
            .resolved(InviteStatus::Rejected, SystemTime::now());

        alice.apply_row(rejected);
        let resolved = alice.view();
        alice.apply_row(sent.clone());

        assert_eq!(alice.view(), resolved);
        assert_eq!(
            resolved.inviter,
            InviterPhase::Resolved {
                invitation_id: sent.id,
                outcome: ClosedOutcome::Rejected
            }
        );
    }

    #[test]
    fn update_seen_before_tracking_is_applied_on_tracking() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        let (row, session) = accepted(&sent);

        alice.apply_row(row);
        assert_eq!(alice.view().inviter, InviterPhase::Idle);

        alice.track_sent(sent.clone());
        assert_eq!(
            alice.view().inviter,
            InviterPhase::SessionReady {
                invitation_id: sent.id,
                session_id: session
            }
        );
        assert!(alice.view().pending_targets.is_empty());
    }

    #[test]
    fn canonical_row_replaces_provisional_copy_wholesale() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());

        let mut canonical = sent.clone();
        canonical.created_at -= Duration::from_millis(250);
        canonical.updated_at = canonical.created_at;
        alice.apply_row(canonical.clone());

        assert_eq!(
            alice.view().inviter,
            InviterPhase::AwaitingResponse(canonical)
        );
    }

    #[test]
    fn invitee_is_presented_and_profile_attached() {
        let mut bob = ParticipantMachine::new("bob", 16);
        let incoming = invite("alice", "bob");

        let followups = bob.apply_row(incoming.clone());
        assert_eq!(
            followups,
            vec![Followup::LookupProfile {
                invitation_id: incoming.id,
                inviter_id: "alice".into()
            }]
        );

        bob.attach_profile(incoming.id, DisplayProfile::placeholder());
        match bob.view().invitee {
            InviteePhase::InvitePresented(presented) => {
                assert_eq!(presented.invitation, incoming);
                assert_eq!(presented.inviter_profile, Some(DisplayProfile::placeholder()));
            }
            other => panic!("unexpected invitee phase {other:?}"),
        }
    }

    #[test]
    fn duplicate_insert_does_not_repeat_profile_lookup() {
        let mut bob = ParticipantMachine::new("bob", 16);
        let incoming = invite("alice", "bob");
        bob.apply_row(incoming.clone());
        let version = bob.version();

        assert!(bob.apply_row(incoming).is_empty());
        assert_eq!(bob.version(), version);
    }

    #[test]
    fn inviter_cancellation_dismisses_presented_invite() {
        let mut bob = ParticipantMachine::new("bob", 16);
        let incoming = invite("alice", "bob");
        bob.apply_row(incoming.clone());

        bob.apply_row(incoming.clone().resolved(InviteStatus::Cancelled, SystemTime::now()));
        assert_eq!(
            bob.view().invitee,
            InviteePhase::Dismissed {
                invitation_id: incoming.id
            }
        );
    }

    #[test]
    fn accepted_row_for_untracked_invite_is_ignored() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());
        alice.reset();
        let version = alice.version();

        let (row, _) = accepted(&sent);
        alice.apply_row(row);
        assert_eq!(alice.view().inviter, InviterPhase::Idle);
        assert_eq!(alice.version(), version);
    }

    #[test]
    fn rows_of_other_users_are_ignored() {
        let mut alice = ParticipantMachine::new("alice", 16);
        assert!(alice.apply_row(invite("carol", "dave")).is_empty());
        assert_eq!(alice.version(), 0);
    }

    #[test]
    fn newer_incoming_invite_replaces_older_one() {
        let mut bob = ParticipantMachine::new("bob", 16);
        let older = invite("alice", "bob");
        let mut newer = invite("carol", "bob");
        newer.created_at = older.created_at + Duration::from_secs(1);

        bob.apply_row(older.clone());
        bob.apply_row(newer.clone());
        // Redelivery of the older insert does not flip the presentation back.
        bob.apply_row(older);

        match bob.view().invitee {
            InviteePhase::InvitePresented(presented) => {
                assert_eq!(presented.invitation.id, newer.id)
            }
            other => panic!("unexpected invitee phase {other:?}"),
        }
    }

    #[test]
    fn own_decline_dismisses_and_late_insert_stays_inert() {
        let mut bob = ParticipantMachine::new("bob", 16);
        let incoming = invite("alice", "bob");
        bob.apply_row(incoming.clone());

        bob.apply_outcome(LocalOutcome::Declined(incoming.id));
        let dismissed = bob.view();
        assert_eq!(
            dismissed.invitee,
            InviteePhase::Dismissed {
                invitation_id: incoming.id
            }
        );

        bob.apply_row(incoming);
        assert_eq!(bob.view(), dismissed);
    }

    #[test]
    fn forget_clears_stale_views() {
        let mut alice = ParticipantMachine::new("alice", 16);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());
        assert_eq!(alice.tracked_ids(), vec![sent.id]);

        alice.forget(sent.id);
        let view = alice.view();
        assert_eq!(view.inviter, InviterPhase::Idle);
        assert!(view.pending_targets.is_empty());
        assert!(alice.tracked_ids().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut bob = ParticipantMachine::new("bob", 2);
        for _ in 0..5 {
            bob.apply_row(invite("alice", "bob"));
        }
        assert_eq!(bob.history.len(), 2);
    }

    #[test]
    fn awaited_row_survives_history_pressure() {
        let mut alice = ParticipantMachine::new("alice", 2);
        let sent = invite("alice", "bob");
        alice.track_sent(sent.clone());

        for _ in 0..5 {
            let other = invite("alice", "carol");
            alice.apply_row(other.resolved(InviteStatus::Rejected, SystemTime::now()));
        }
        assert_eq!(alice.history.len(), 2);
        assert!(alice.history.contains_key(&sent.id));

        alice.apply_outcome(LocalOutcome::Cancelled(sent.id));
        assert!(alice.history[&sent.id].status.is_terminal());
    }

    #[test]
    fn dismissed_invite_stays_dismissed_after_history_pressure() {
        let mut bob = ParticipantMachine::new("bob", 2);
        let incoming = invite("alice", "bob");
        bob.apply_row(incoming.clone());
        bob.apply_outcome(LocalOutcome::Declined(incoming.id));
        let dismissed = bob.view();

        // Pending rows of invitations bob sent elsewhere, never tracked locally.
        for _ in 0..5 {
            bob.apply_row(invite("bob", "carol"));
        }
        assert!(bob.history.contains_key(&incoming.id));

        bob.apply_row(incoming);
        assert_eq!(bob.view(), dismissed);
    }
}
