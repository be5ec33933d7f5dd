use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use poise::serenity_prelude::{self as serenity};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::db::SessionMirror;
use super::dispatch::Dispatch;
use super::error::RecruitError;
use super::session::{
    BroadcastScope, NewSession, Outcome, Participant, RecruitmentSession, RosterSnapshot,
    SessionId,
};
use super::timer::{self, MAX_TIMER_DELAY};

#[derive(Debug, Clone)]
pub(crate) struct RecruitPolicy {
    pub(crate) min_players: u8,
    pub(crate) max_players: u8,
    /// a session has to fire strictly later than now + `min_lead`, keep it under
    /// a minute or the shortest countdown is rejected
    pub(crate) min_lead: chrono::Duration,
    /// how far in the future a session may fire at the latest
    pub(crate) max_ahead: chrono::Duration,
    pub(crate) max_timer_step: Duration,
}

impl Default for RecruitPolicy {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 10,
            min_lead: chrono::Duration::seconds(30),
            max_ahead: chrono::Duration::days(60),
            max_timer_step: MAX_TIMER_DELAY,
        }
    }
}

/// Tally of direct messages sent for one terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct DeliveryReport {
    pub(crate) attempted: usize,
    pub(crate) failed: usize,
}

impl DeliveryReport {
    /// Some, but not all, recipients were unreachable
    pub(crate) fn degraded(&self) -> Option<RecruitError> {
        (self.failed > 0 && self.failed < self.attempted).then_some(
            RecruitError::DeliveryDegraded {
                failed: self.failed,
                attempted: self.attempted,
            },
        )
    }
}

enum MirrorWrite {
    Created(RosterSnapshot),
    Finished(SessionId, Outcome),
}

/// Applies mirror writes one at a time and in order, failures are only logged
async fn run_mirror(
    mirror: Arc<dyn SessionMirror>,
    mut writes: mpsc::UnboundedReceiver<MirrorWrite>,
) {
    while let Some(write) = writes.recv().await {
        match write {
            MirrorWrite::Created(snapshot) => {
                if let Err(err) = mirror.record_created(&snapshot).await {
                    warn!(
                        session.id = snapshot.id().get(),
                        "couldn't mirror new session: {}",
                        err
                    );
                }
            }
            MirrorWrite::Finished(id, outcome) => {
                if let Err(err) = mirror.record_outcome(id, outcome).await {
                    warn!(session.id = id.get(), "couldn't mirror session outcome: {}", err);
                }
            }
        }
    }
}

/// Owns every live recruitment session and its expiry timer.
///
/// Each mutation commits against the live table (and removes the session on a
/// terminal transition) before anything is sent anywhere, notifications then go
/// out from a snapshot. The per-key locking of the `DashMap` entry API is what
/// keeps two simultaneous joins from both filling the same session.
///
/// Edits to a session's status message go through its entry in `status_locks`,
/// so a late roster refresh can't reopen a message that's already been closed.
pub(crate) struct RecruitmentSessionManager {
    sessions: DashMap<SessionId, RecruitmentSession>,
    timers: DashMap<SessionId, AbortHandle>,
    status_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    next_id: AtomicU64,
    dispatch: Arc<dyn Dispatch>,
    mirror: mpsc::UnboundedSender<MirrorWrite>,
    policy: RecruitPolicy,
    this: Weak<RecruitmentSessionManager>,
}

impl RecruitmentSessionManager {
    pub(crate) fn new(
        dispatch: Arc<dyn Dispatch>,
        mirror: Arc<dyn SessionMirror>,
        policy: RecruitPolicy,
    ) -> Arc<Self> {
        // time-derived so ids from a previous run don't collide with mirror rows
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);

        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mirror(mirror, mirror_rx));

        Arc::new_cyclic(|this| Self {
            sessions: DashMap::new(),
            timers: DashMap::new(),
            status_locks: DashMap::new(),
            next_id: AtomicU64::new(seed),
            dispatch,
            mirror: mirror_tx,
            policy,
            this: this.clone(),
        })
    }

    pub(crate) fn create_session(&self, req: NewSession) -> Result<SessionId, RecruitError> {
        self.create_session_at(req, Utc::now())
    }

    /// Puts a new session live and arms its timer, the mirror write is queued
    pub(crate) fn create_session_at(
        &self,
        req: NewSession,
        now: DateTime<Utc>,
    ) -> Result<SessionId, RecruitError> {
        let policy = &self.policy;
        if !(policy.min_players..=policy.max_players).contains(&req.max_players) {
            return Err(RecruitError::InvalidCapacity {
                requested: req.max_players,
                min: policy.min_players,
                max: policy.max_players,
            });
        }

        let fire_at = req.activation.resolve(now);
        if fire_at <= now + policy.min_lead {
            return Err(RecruitError::InvalidSchedule(format!(
                "지금부터 {}초보다 뒤로 정해주세요",
                policy.min_lead.num_seconds()
            )));
        }
        if fire_at > now + policy.max_ahead {
            return Err(RecruitError::InvalidSchedule(format!(
                "{}일 이내로 정해주세요",
                policy.max_ahead.num_days()
            )));
        }

        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = RecruitmentSession::new(id, req, fire_at, now);
        let snapshot = session.snapshot();
        self.sessions.insert(id, session);
        self.status_locks.insert(id, Arc::default());

        let delay = (fire_at - now).to_std().unwrap_or_default();
        self.arm(id, delay);

        info!(
            session.id = id.get(),
            host.id = snapshot.info.host.id.get(),
            game = snapshot.info.game.as_str(),
            max_players = snapshot.info.max_players,
            fire_at = %fire_at,
            "recruitment session created"
        );

        self.mirror_write(MirrorWrite::Created(snapshot));

        Ok(id)
    }

    /// Drops a session that never got a status message, nobody is notified
    pub(crate) fn discard(&self, id: SessionId) -> bool {
        if self.sessions.remove(&id).is_none() {
            return false;
        }
        self.disarm(id);
        self.status_locks.remove(&id);

        warn!(session.id = id.get(), "discarded recruitment session");
        self.mirror_write(MirrorWrite::Finished(id, Outcome::Cancelled));
        true
    }

    fn arm(&self, id: SessionId, delay: Duration) {
        let this = self.this.clone();
        let handle = timer::schedule_after(delay, self.policy.max_timer_step, async move {
            if let Some(manager) = this.upgrade() {
                manager.fire_expiry(id).await;
            }
        });

        self.timers.insert(id, handle.abort_handle());

        // the timer may have already run to completion on another worker
        if !self.sessions.contains_key(&id) {
            self.timers.remove(&id);
        }
    }

    fn disarm(&self, id: SessionId) {
        if let Some((_, handle)) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    /// Remembers the public status message so it can be closed later
    pub(crate) fn attach_status_message(
        &self,
        id: SessionId,
        message: serenity::MessageId,
    ) -> Result<(), RecruitError> {
        let mut session = self.sessions.get_mut(&id).ok_or(RecruitError::NotFound)?;
        session.set_status_message(message);
        Ok(())
    }

    pub(crate) fn snapshot(&self, id: SessionId) -> Option<RosterSnapshot> {
        self.sessions.get(&id).map(|s| s.snapshot())
    }

    /// Live sessions of one guild, soonest first
    pub(crate) fn live_sessions(&self, guild_id: Option<serenity::GuildId>) -> Vec<RosterSnapshot> {
        let mut sessions: Vec<RosterSnapshot> = self
            .sessions
            .iter()
            .filter(|s| s.info().guild_id == guild_id)
            .map(|s| s.snapshot())
            .collect();

        sessions.sort_by_key(|s| s.info.fire_at);
        sessions
    }

    pub(crate) fn live_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) async fn join(
        &self,
        id: SessionId,
        participant: Participant,
    ) -> Result<RosterSnapshot, RecruitError> {
        let user_id = participant.id;

        let (snapshot, filled) = match self.sessions.entry(id) {
            Entry::Vacant(_) => return Err(RecruitError::NotFound),
            Entry::Occupied(mut entry) => {
                entry.get_mut().admit(participant)?;

                match entry.get().is_full() {
                    true => (entry.remove().snapshot(), true),
                    false => (entry.get().snapshot(), false),
                }
            }
        };

        if !filled {
            debug!(
                session.id = id.get(),
                user.id = user_id.get(),
                roster = snapshot.roster.len(),
                "participant joined"
            );
            self.refresh_status(id).await;
            return Ok(snapshot);
        }

        info!(session.id = id.get(), user.id = user_id.get(), "session filled");
        self.disarm(id);
        self.finish(&snapshot, Outcome::Filled).await;

        Ok(snapshot)
    }

    pub(crate) async fn leave(
        &self,
        id: SessionId,
        user: serenity::UserId,
    ) -> Result<RosterSnapshot, RecruitError> {
        let snapshot = {
            let mut session = self.sessions.get_mut(&id).ok_or(RecruitError::NotFound)?;
            session.release(user)?;
            session.snapshot()
        };

        debug!(session.id = id.get(), user.id = user.get(), "participant left");
        self.refresh_status(id).await;
        Ok(snapshot)
    }

    /// Redraws the status message from the live roster
    pub(crate) async fn refresh_status(&self, id: SessionId) {
        let Some(lock) = self.status_locks.get(&id).map(|l| l.clone()) else {
            return;
        };
        let _guard = lock.lock().await;

        // read under the lock, the session may have closed while we waited
        let Some(snapshot) = self.snapshot(id) else {
            return;
        };
        if snapshot.status_message.is_none() {
            return;
        }

        if let Err(err) = self.dispatch.update_status(&snapshot).await {
            warn!(session.id = id.get(), "couldn't update status message: {}", err);
        }
    }

    pub(crate) async fn cancel(
        &self,
        id: SessionId,
        requester: serenity::UserId,
    ) -> Result<DeliveryReport, RecruitError> {
        let cancelled = match self.sessions.entry(id) {
            Entry::Vacant(_) => return Err(RecruitError::NotFound),
            Entry::Occupied(entry) => {
                if entry.get().info().host.id != requester {
                    return Err(RecruitError::NotHost);
                }
                entry.remove().snapshot()
            }
        };

        info!(session.id = id.get(), "session cancelled by host");
        self.disarm(id);

        Ok(self.finish(&cancelled, Outcome::Cancelled).await)
    }

    /// Timer callback for a session's fire instant
    pub(crate) async fn fire_expiry(&self, id: SessionId) {
        // runs inside the timer task itself, so drop the handle without aborting
        self.timers.remove(&id);

        let Some((_, session)) = self.sessions.remove(&id) else {
            debug!(session.id = id.get(), "expiry fired for a session that's already gone");
            return;
        };

        let snapshot = session.snapshot();
        let outcome = match snapshot.is_full() {
            true => Outcome::Filled,
            false => Outcome::Expired,
        };

        info!(session.id = id.get(), outcome = outcome.as_str(), "session timer fired");
        self.finish(&snapshot, outcome).await;
    }

    pub(crate) async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Tears down every session whose fire instant is at or before `now`.
    ///
    /// Only sessions whose timer got lost are expected here; a session that's
    /// already gone by the time it's removed was handled by its timer and isn't
    /// counted.
    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let overdue: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.info().fire_at <= now)
            .map(|s| *s.key())
            .collect();

        let mut swept = 0;
        for id in overdue {
            let Some((_, session)) = self.sessions.remove(&id) else {
                continue;
            };
            self.disarm(id);

            let snapshot = session.snapshot();
            let outcome = match snapshot.is_full() {
                true => Outcome::Filled,
                false => Outcome::Expired,
            };

            warn!(
                session.id = id.get(),
                fire_at = %snapshot.info.fire_at,
                "swept overdue session"
            );
            self.finish(&snapshot, outcome).await;
            swept += 1;
        }

        swept
    }

    /// Cancels all timers and forgets all sessions without notifying anyone
    pub(crate) fn shutdown(&self) {
        let timers = self.timers.len();
        for handle in self.timers.iter() {
            handle.abort();
        }
        self.timers.clear();

        let sessions = self.sessions.len();
        self.sessions.clear();
        self.status_locks.clear();

        info!(sessions, timers, "recruitment manager shut down");
    }

    async fn finish(&self, snapshot: &RosterSnapshot, outcome: Outcome) -> DeliveryReport {
        let id = snapshot.id();

        // waits out a refresh that's still in flight
        if let Some((_, lock)) = self.status_locks.remove(&id) {
            let _guard = lock.lock().await;
            if let Err(err) = self.dispatch.close_status(snapshot, outcome).await {
                warn!(session.id = id.get(), "couldn't close status message: {}", err);
            }
        }

        if snapshot.info.scope == BroadcastScope::Server {
            if let Err(err) = self.dispatch.announce(snapshot, outcome).await {
                warn!(session.id = id.get(), "couldn't post {} notice: {}", outcome.as_str(), err);
            }
        }

        let report = self.notify_roster(snapshot, outcome).await;
        if let Some(degraded) = report.degraded() {
            warn!(session.id = id.get(), "{}", degraded);
            if let Err(err) = self.dispatch.report_degraded(snapshot, &degraded).await {
                warn!(session.id = id.get(), "couldn't post degraded delivery notice: {}", err);
            }
        }

        self.mirror_write(MirrorWrite::Finished(id, outcome));

        report
    }

    fn mirror_write(&self, write: MirrorWrite) {
        if self.mirror.send(write).is_err() {
            warn!("mirror writer is gone, dropping write");
        }
    }

    /// Direct messages everyone affected, one failure doesn't stop the others
    async fn notify_roster(&self, snapshot: &RosterSnapshot, outcome: Outcome) -> DeliveryReport {
        let recipients: Vec<&Participant> = snapshot
            .roster
            .iter()
            // the host cancelled it themselves
            .filter(|p| outcome != Outcome::Cancelled || p.id != snapshot.info.host.id)
            .collect();

        let results = futures::future::join_all(
            recipients
                .iter()
                .map(|p| self.dispatch.direct(p.id, snapshot, outcome)),
        )
        .await;

        let mut report = DeliveryReport {
            attempted: recipients.len(),
            failed: 0,
        };
        for (participant, result) in recipients.iter().zip(results) {
            if let Err(err) = result {
                report.failed += 1;
                warn!(
                    session.id = snapshot.id().get(),
                    user.id = participant.id.get(),
                    "couldn't send direct message: {}",
                    err
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::modules::recruit::session::Activation;
    use crate::types::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Close(u64, Outcome),
        Announce(u64, Outcome),
        Direct(u64, u64, Outcome),
        Degraded(u64, usize, usize),
        Update(u64, usize),
    }

    #[derive(Default)]
    struct FakeDispatch {
        sent: Mutex<Vec<Sent>>,
        unreachable: HashSet<u64>,
        /// how long a status message edit takes to land
        update_latency: Option<Duration>,
    }

    impl FakeDispatch {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&Sent) -> bool) -> usize {
            self.sent().iter().filter(|s| pred(s)).count()
        }
    }

    #[serenity::async_trait]
    impl Dispatch for FakeDispatch {
        async fn announce(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Announce(session.id().get(), outcome));
            Ok(())
        }

        async fn direct(
            &self,
            user: serenity::UserId,
            session: &RosterSnapshot,
            outcome: Outcome,
        ) -> Result<(), Error> {
            if self.unreachable.contains(&user.get()) {
                return Err("cannot send messages to this user".into());
            }
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Direct(session.id().get(), user.get(), outcome));
            Ok(())
        }

        async fn update_status(&self, session: &RosterSnapshot) -> Result<(), Error> {
            if let Some(latency) = self.update_latency {
                tokio::time::sleep(latency).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Update(session.id().get(), session.roster.len()));
            Ok(())
        }

        async fn close_status(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Close(session.id().get(), outcome));
            Ok(())
        }

        async fn report_degraded(
            &self,
            session: &RosterSnapshot,
            degraded: &RecruitError,
        ) -> Result<(), Error> {
            let RecruitError::DeliveryDegraded { failed, attempted } = degraded else {
                return Err("unexpected error".into());
            };
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Degraded(session.id().get(), *failed, *attempted));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMirror {
        broken: bool,
        latency: Option<Duration>,
        created: Mutex<Vec<u64>>,
        outcomes: Mutex<Vec<(u64, Outcome)>>,
    }

    #[serenity::async_trait]
    impl SessionMirror for FakeMirror {
        async fn record_created(&self, session: &RosterSnapshot) -> Result<(), Error> {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.broken {
                return Err("connection refused".into());
            }
            self.created.lock().unwrap().push(session.id().get());
            Ok(())
        }

        async fn record_outcome(&self, id: SessionId, outcome: Outcome) -> Result<(), Error> {
            if self.broken {
                return Err("connection refused".into());
            }
            self.outcomes.lock().unwrap().push((id.get(), outcome));
            Ok(())
        }
    }

    const HOST: u64 = 100;

    fn p(id: u64) -> Participant {
        Participant::new(serenity::UserId::new(id), format!("user{}", id))
    }

    fn uid(id: u64) -> serenity::UserId {
        serenity::UserId::new(id)
    }

    fn request(max_players: u8, activation: Activation, scope: BroadcastScope) -> NewSession {
        NewSession {
            host: p(HOST),
            game: "리그 오브 레전드".into(),
            description: "칼바람 한 판".into(),
            max_players,
            activation,
            scope,
            guild_id: Some(serenity::GuildId::new(1)),
            channel_id: serenity::ChannelId::new(2),
        }
    }

    fn minutes(n: i64) -> Activation {
        Activation::Countdown(chrono::Duration::minutes(n))
    }

    struct Harness {
        manager: Arc<RecruitmentSessionManager>,
        dispatch: Arc<FakeDispatch>,
        mirror: Arc<FakeMirror>,
    }

    fn harness_with(dispatch: FakeDispatch, mirror: FakeMirror, policy: RecruitPolicy) -> Harness {
        let dispatch = Arc::new(dispatch);
        let mirror = Arc::new(mirror);
        let manager = RecruitmentSessionManager::new(dispatch.clone(), mirror.clone(), policy);
        Harness {
            manager,
            dispatch,
            mirror,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeDispatch::default(),
            FakeMirror::default(),
            RecruitPolicy::default(),
        )
    }

    /// lets the queued mirror writes land
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn status_edits(dispatch: &FakeDispatch) -> Vec<Sent> {
        dispatch
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Update(..) | Sent::Close(..)))
            .collect()
    }

    fn roster_ids(snapshot: &RosterSnapshot) -> Vec<u64> {
        snapshot.roster.iter().map(|p| p.id.get()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn host_is_sole_member_and_session_is_mirrored() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();

        let snapshot = h.manager.snapshot(id).unwrap();
        assert_eq!(roster_ids(&snapshot), vec![HOST]);
        settle().await;
        assert_eq!(h.mirror.created.lock().unwrap().clone(), vec![id.get()]);
        assert_eq!(h.manager.live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_unique_and_increasing() {
        let h = harness();
        let a = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        let b = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_and_capacity_are_validated() {
        let h = harness();
        let now = Utc::now();

        let too_soon = h
            .manager
            .create_session_at(request(4, Activation::At(now), BroadcastScope::Server), now);
        assert!(matches!(too_soon, Err(RecruitError::InvalidSchedule(_))));

        let in_the_past = h
            .manager
            .create_session_at(
                request(
                    4,
                    Activation::At(now - chrono::Duration::hours(1)),
                    BroadcastScope::Server,
                ),
                now,
            );
        assert!(matches!(in_the_past, Err(RecruitError::InvalidSchedule(_))));

        let too_far = h
            .manager
            .create_session_at(
                request(4, minutes(61 * 24 * 60), BroadcastScope::Server),
                now,
            );
        assert!(matches!(too_far, Err(RecruitError::InvalidSchedule(_))));

        for bad in [0, 1, 11] {
            let res = h
                .manager
                .create_session_at(request(bad, minutes(30), BroadcastScope::Server), now);
            assert!(matches!(res, Err(RecruitError::InvalidCapacity { .. })));
        }

        assert_eq!(h.manager.live_count(), 0);
        settle().await;
        assert!(h.mirror.created.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fire_instant_must_be_strictly_after_the_lead() {
        let h = harness_with(
            FakeDispatch::default(),
            FakeMirror::default(),
            RecruitPolicy {
                min_lead: chrono::Duration::minutes(10),
                ..Default::default()
            },
        );
        let now = Utc::now();

        let on_the_boundary = h
            .manager
            .create_session_at(request(4, minutes(10), BroadcastScope::Server), now);
        assert!(matches!(on_the_boundary, Err(RecruitError::InvalidSchedule(_))));

        let just_after =
            Activation::At(now + chrono::Duration::minutes(10) + chrono::Duration::seconds(1));
        assert!(h
            .manager
            .create_session_at(request(4, just_after, BroadcastScope::Server), now)
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn default_lead_accepts_the_shortest_countdown() {
        let h = harness();
        assert!(h
            .manager
            .create_session(request(4, minutes(1), BroadcastScope::Server))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_mirror_does_not_hold_up_creation() {
        let h = harness_with(
            FakeDispatch::default(),
            FakeMirror {
                broken: true,
                latency: Some(Duration::from_secs(30)),
                ..Default::default()
            },
            RecruitPolicy::default(),
        );

        let started = tokio::time::Instant::now();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(h.manager.snapshot(id).is_some());

        // the failed write is only logged
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(h.manager.snapshot(id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn discarded_session_is_gone_without_notices() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(3, minutes(10), BroadcastScope::Server))
            .unwrap();

        assert!(h.manager.discard(id));
        assert!(!h.manager.discard(id));
        assert!(h.manager.snapshot(id).is_none());
        assert_eq!(h.manager.join(id, p(1)).await.unwrap_err(), RecruitError::NotFound);

        // its timer went with it
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert!(h.dispatch.sent().is_empty());
        assert_eq!(
            h.mirror.outcomes.lock().unwrap().clone(),
            vec![(id.get(), Outcome::Cancelled)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mirror_failure_does_not_stop_the_session() {
        let h = harness_with(
            FakeDispatch::default(),
            FakeMirror {
                broken: true,
                ..Default::default()
            },
            RecruitPolicy::default(),
        );

        let id = h
            .manager
            .create_session(request(2, minutes(30), BroadcastScope::Server))
            .unwrap();

        let snapshot = h.manager.join(id, p(1)).await.unwrap();
        assert!(snapshot.is_full());
        assert_eq!(
            h.dispatch
                .count(|s| matches!(s, Sent::Announce(_, Outcome::Filled))),
            1
        );
    }

    // Scenario A
    #[tokio::test(start_paused = true)]
    async fn two_player_session_fills_on_first_join() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(2, minutes(30), BroadcastScope::Server))
            .unwrap();

        assert_eq!(h.manager.join(id, p(HOST)).await.unwrap_err(), RecruitError::AlreadyHost);

        let snapshot = h.manager.join(id, p(1)).await.unwrap();
        assert_eq!(roster_ids(&snapshot), vec![HOST, 1]);
        assert!(snapshot.is_full());

        assert!(h.manager.snapshot(id).is_none());
        assert_eq!(
            h.dispatch
                .count(|s| matches!(s, Sent::Announce(_, Outcome::Filled))),
            1
        );
        assert_eq!(
            h.dispatch
                .count(|s| matches!(s, Sent::Direct(_, _, Outcome::Filled))),
            2
        );
        settle().await;
        assert_eq!(
            h.mirror.outcomes.lock().unwrap().clone(),
            vec![(id.get(), Outcome::Filled)]
        );

        // the cancelled timer must not announce anything later on
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Announce(..))), 1);
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Close(..))), 1);
    }

    // Scenario B
    #[tokio::test(start_paused = true)]
    async fn under_capacity_session_expires_on_time() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(3, minutes(10), BroadcastScope::Server))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(9 * 60 + 59)).await;
        assert!(h.manager.snapshot(id).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.manager.snapshot(id).is_none());

        let sent = h.dispatch.sent();
        assert!(sent.contains(&Sent::Close(id.get(), Outcome::Expired)));
        assert!(sent.contains(&Sent::Announce(id.get(), Outcome::Expired)));
        assert!(sent.contains(&Sent::Direct(id.get(), HOST, Outcome::Expired)));
        assert!(sent.contains(&Sent::Direct(id.get(), 1, Outcome::Expired)));
        assert_eq!(h.manager.join(id, p(2)).await.unwrap_err(), RecruitError::NotFound);
    }

    // Scenario C
    #[tokio::test(start_paused = true)]
    async fn only_the_host_cancels_and_nobody_else_leaves_for_them() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();

        assert_eq!(h.manager.leave(id, uid(HOST)).await.unwrap_err(), RecruitError::IsHost);
        assert_eq!(h.manager.cancel(id, uid(1)).await.unwrap_err(), RecruitError::NotHost);
        assert!(h.manager.snapshot(id).is_some());

        let report = h.manager.cancel(id, uid(HOST)).await.unwrap();
        assert_eq!(report, DeliveryReport { attempted: 1, failed: 0 });
        assert!(h.manager.snapshot(id).is_none());

        let sent = h.dispatch.sent();
        assert!(sent.contains(&Sent::Announce(id.get(), Outcome::Cancelled)));
        assert!(sent.contains(&Sent::Direct(id.get(), 1, Outcome::Cancelled)));
        assert!(!sent.contains(&Sent::Direct(id.get(), HOST, Outcome::Cancelled)));

        // timer was disarmed
        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Close(..))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn participant_scope_cancel_posts_no_channel_notice() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Participants))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();
        h.manager.cancel(id, uid(HOST)).await.unwrap();

        let sent = h.dispatch.sent();
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Announce(..))), 0);
        assert!(sent.contains(&Sent::Close(id.get(), Outcome::Cancelled)));
        assert!(sent.contains(&Sent::Direct(id.get(), 1, Outcome::Cancelled)));
    }

    // Scenario D
    #[tokio::test(start_paused = true)]
    async fn join_leave_join_again() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();

        h.manager.join(id, p(1)).await.unwrap();
        let after_leave = h.manager.leave(id, uid(1)).await.unwrap();
        assert_eq!(roster_ids(&after_leave), vec![HOST]);

        let rejoined = h.manager.join(id, p(1)).await.unwrap();
        assert_eq!(roster_ids(&rejoined), vec![HOST, 1]);

        assert_eq!(h.manager.leave(id, uid(2)).await.unwrap_err(), RecruitError::NotJoined);
        assert_eq!(h.manager.join(id, p(1)).await.unwrap_err(), RecruitError::AlreadyJoined);
    }

    #[tokio::test(start_paused = true)]
    async fn roster_keeps_join_order_across_leaves() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(6, minutes(30), BroadcastScope::Server))
            .unwrap();

        for n in 1..=4 {
            h.manager.join(id, p(n)).await.unwrap();
        }
        let snapshot = h.manager.leave(id, uid(2)).await.unwrap();
        assert_eq!(roster_ids(&snapshot), vec![HOST, 1, 3, 4]);
        assert_eq!(snapshot.remaining(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_sessions_answer_not_found_forever() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(3, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager.cancel(id, uid(HOST)).await.unwrap();

        assert_eq!(h.manager.cancel(id, uid(HOST)).await.unwrap_err(), RecruitError::NotFound);
        assert_eq!(h.manager.join(id, p(1)).await.unwrap_err(), RecruitError::NotFound);
        assert_eq!(h.manager.leave(id, uid(1)).await.unwrap_err(), RecruitError::NotFound);
        assert_eq!(
            h.manager
                .attach_status_message(id, serenity::MessageId::new(5))
                .unwrap_err(),
            RecruitError::NotFound
        );
        assert_eq!(
            h.manager
                .join(SessionId::new(424242), p(1))
                .await
                .unwrap_err(),
            RecruitError::NotFound
        );
        assert_eq!(h.manager.live_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_joins_fill_exactly_once() {
        for _ in 0..50 {
            let h = harness();
            let id = h
                .manager
                .create_session(request(3, minutes(30), BroadcastScope::Server))
                .unwrap();
            h.manager.join(id, p(1)).await.unwrap();

            let a = tokio::spawn({
                let manager = h.manager.clone();
                async move { manager.join(id, p(2)).await }
            });
            let b = tokio::spawn({
                let manager = h.manager.clone();
                async move { manager.join(id, p(3)).await }
            });
            let results = [a.await.unwrap(), b.await.unwrap()];

            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1);
            // the fill tears the session down before the loser gets the lock
            for loser in results.iter().filter_map(|r| r.as_ref().err()) {
                assert_eq!(loser, &RecruitError::NotFound);
            }
            assert_eq!(
                h.dispatch
                    .count(|s| matches!(s, Sent::Announce(_, Outcome::Filled))),
                1
            );
            h.manager.shutdown();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_dm_failure_is_reported_once() {
        let h = harness_with(
            FakeDispatch {
                unreachable: HashSet::from([2]),
                ..Default::default()
            },
            FakeMirror::default(),
            RecruitPolicy::default(),
        );
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();
        h.manager.join(id, p(2)).await.unwrap();

        let report = h.manager.cancel(id, uid(HOST)).await.unwrap();
        assert_eq!(report, DeliveryReport { attempted: 2, failed: 1 });

        let sent = h.dispatch.sent();
        assert!(sent.contains(&Sent::Direct(id.get(), 1, Outcome::Cancelled)));
        assert!(sent.contains(&Sent::Degraded(id.get(), 1, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn total_dm_failure_is_not_reported_as_degraded() {
        let h = harness_with(
            FakeDispatch {
                unreachable: HashSet::from([1]),
                ..Default::default()
            },
            FakeMirror::default(),
            RecruitPolicy::default(),
        );
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();

        let report = h.manager.cancel(id, uid(HOST)).await.unwrap();
        assert_eq!(report, DeliveryReport { attempted: 1, failed: 1 });
        assert_eq!(report.degraded(), None);
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Degraded(..))), 0);
        assert!(h.manager.snapshot(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_with_full_roster_counts_as_filled() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(2, minutes(30), BroadcastScope::Server))
            .unwrap();

        // force the race: the roster is full but the fill path never ran
        h.manager
            .sessions
            .get_mut(&id)
            .unwrap()
            .admit(p(1))
            .unwrap();

        h.manager.fire_expiry(id).await;
        assert!(h.manager.snapshot(id).is_none());
        assert!(h
            .dispatch
            .sent()
            .contains(&Sent::Announce(id.get(), Outcome::Filled)));

        // a second firing finds nothing to do
        h.manager.fire_expiry(id).await;
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Announce(..))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_overdue_sessions() {
        let h = harness();
        let now = Utc::now();
        let soon = h
            .manager
            .create_session_at(request(3, minutes(5), BroadcastScope::Server), now)
            .unwrap();
        let later = h
            .manager
            .create_session_at(request(3, minutes(120), BroadcastScope::Server), now)
            .unwrap();

        let swept = h.manager.sweep_at(now + chrono::Duration::minutes(10)).await;
        assert_eq!(swept, 1);
        assert!(h.manager.snapshot(soon).is_none());
        assert!(h.manager.snapshot(later).is_some());
        assert!(h
            .dispatch
            .sent()
            .contains(&Sent::Announce(soon.get(), Outcome::Expired)));

        // the swept session's own timer was disarmed, the other one still fires
        tokio::time::sleep(Duration::from_secs(121 * 60)).await;
        assert_eq!(h.dispatch.count(|s| matches!(s, Sent::Close(..))), 2);
        assert_eq!(h.manager.sweep_at(now + chrono::Duration::days(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_schedule_is_chained_through_short_timer_steps() {
        let h = harness_with(
            FakeDispatch::default(),
            FakeMirror::default(),
            RecruitPolicy {
                max_timer_step: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let id = h
            .manager
            .create_session(request(3, minutes(10), BroadcastScope::Server))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(9 * 60 + 30)).await;
        assert!(h.manager.snapshot(id).is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(h.manager.snapshot(id).is_none());
        assert!(h
            .dispatch
            .sent()
            .contains(&Sent::Announce(id.get(), Outcome::Expired)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_sessions_and_silences_timers() {
        let h = harness();
        for _ in 0..3 {
            h.manager
                .create_session(request(3, minutes(10), BroadcastScope::Server))
                .unwrap();
        }
        assert_eq!(h.manager.live_count(), 3);

        h.manager.shutdown();
        assert_eq!(h.manager.live_count(), 0);
        assert!(h.manager.status_locks.is_empty());

        // a second shutdown, e.g. after the gateway went away for good, is harmless
        h.manager.shutdown();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(h.dispatch.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_message_travels_with_snapshots() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(2, minutes(10), BroadcastScope::Server))
            .unwrap();
        h.manager
            .attach_status_message(id, serenity::MessageId::new(77))
            .unwrap();

        let filled = h.manager.join(id, p(1)).await.unwrap();
        assert_eq!(filled.status_message, Some(serenity::MessageId::new(77)));
    }

    #[tokio::test(start_paused = true)]
    async fn live_sessions_are_scoped_to_guild_and_sorted() {
        let h = harness();
        let now = Utc::now();
        let late = h
            .manager
            .create_session_at(request(3, minutes(90), BroadcastScope::Server), now)
            .unwrap();
        let early = h
            .manager
            .create_session_at(request(3, minutes(15), BroadcastScope::Server), now)
            .unwrap();
        let mut elsewhere = request(3, minutes(5), BroadcastScope::Server);
        elsewhere.guild_id = Some(serenity::GuildId::new(999));
        h.manager.create_session_at(elsewhere, now).unwrap();

        let listed: Vec<SessionId> = h
            .manager
            .live_sessions(Some(serenity::GuildId::new(1)))
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(listed, vec![early, late]);
    }

    #[tokio::test(start_paused = true)]
    async fn roster_changes_redraw_the_status_message() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(4, minutes(30), BroadcastScope::Server))
            .unwrap();

        // nothing to redraw before the message exists
        h.manager.join(id, p(1)).await.unwrap();
        assert!(status_edits(&h.dispatch).is_empty());

        h.manager
            .attach_status_message(id, serenity::MessageId::new(77))
            .unwrap();
        h.manager.join(id, p(2)).await.unwrap();
        h.manager.leave(id, uid(1)).await.unwrap();
        assert_eq!(
            status_edits(&h.dispatch),
            vec![Sent::Update(id.get(), 3), Sent::Update(id.get(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_a_redraw_in_flight() {
        let h = harness_with(
            FakeDispatch {
                update_latency: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            FakeMirror::default(),
            RecruitPolicy::default(),
        );
        let id = h
            .manager
            .create_session(request(3, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager
            .attach_status_message(id, serenity::MessageId::new(77))
            .unwrap();

        let first = tokio::spawn({
            let manager = h.manager.clone();
            async move { manager.join(id, p(1)).await }
        });
        // let the first join start its slow redraw
        tokio::task::yield_now().await;

        let filled = h.manager.join(id, p(2)).await.unwrap();
        assert!(filled.is_full());
        first.await.unwrap().unwrap();

        assert_eq!(
            status_edits(&h.dispatch),
            vec![Sent::Update(id.get(), 2), Sent::Close(id.get(), Outcome::Filled)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_redraw_leaves_a_closed_session_alone() {
        let h = harness();
        let id = h
            .manager
            .create_session(request(2, minutes(30), BroadcastScope::Server))
            .unwrap();
        h.manager
            .attach_status_message(id, serenity::MessageId::new(77))
            .unwrap();
        h.manager.join(id, p(1)).await.unwrap();

        h.manager.refresh_status(id).await;
        assert_eq!(
            status_edits(&h.dispatch),
            vec![Sent::Close(id.get(), Outcome::Filled)]
        );
    }
}
