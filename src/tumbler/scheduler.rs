// =============================================================================
// TUMBLEMIX v0.4 - Deferred Actions & Session Expiration
// =============================================================================
//
// A single minute-granularity ticker drives everything time-based: it
// expires sessions whose window has passed and fires deferred actions
// whose wait is over, typically confirmation polls that resume a paused
// exchange. One mutex guards both lists; it is dropped before callbacks
// run so they may re-enter the tumbler. On shutdown, unprocessed items go
// back on their lists rather than being dropped.
//
// =============================================================================

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::tumbler::session::{FinalizeReason, Session};
use crate::tumbler::solver::PaymentOffer;
use crate::tumbler::{Tumbler, TumblerError};

/// Cadence of the session ticker.
const TICK_PERIOD: Duration = Duration::from_secs(60);

/// Work a session postponed until a chain condition has time to change.
pub(crate) struct DeferredAction {
    pub session: Arc<Session>,
    pub call: DeferredCall,
    pub until: Instant,
}

/// The callback side of a deferred action.
pub(crate) enum DeferredCall {
    /// Re-check the payer's offer transaction for confirmation.
    ValidateOffer(Box<PaymentOffer>),
}

#[derive(Default)]
struct SchedulerState {
    /// Sessions waiting for expiration, in creation order.
    pending: Vec<Arc<Session>>,
    /// Deferred actions, in registration order.
    actions: Vec<DeferredAction>,
}

/// Shared state of the ticker.
pub(crate) struct Scheduler {
    inner: StdMutex<SchedulerState>,
}

impl Scheduler {
    pub(crate) fn new() -> Scheduler {
        Scheduler {
            inner: StdMutex::new(SchedulerState::default()),
        }
    }

    /// Puts a new session on the expiration list.
    pub(crate) fn track(&self, session: Arc<Session>) {
        self.inner.lock().unwrap().pending.push(session);
    }

    /// Drops the session from the expiration list and removes all of its
    /// deferred actions.
    pub(crate) fn untrack(&self, session: &Session) {
        let mut state = self.inner.lock().unwrap();
        state
            .pending
            .retain(|s| !std::ptr::eq(Arc::as_ptr(s), session));
        state
            .actions
            .retain(|a| !std::ptr::eq(Arc::as_ptr(&a.session), session));
    }

    pub(crate) fn defer(&self, action: DeferredAction) {
        self.inner.lock().unwrap().actions.push(action);
    }

    /// Extracts everything due at `now`: expired sessions first, then
    /// due actions. Actions belonging to a session that just expired are
    /// discarded, its finalization cancels them wholesale.
    fn collect(&self, now: Instant) -> (Vec<Arc<Session>>, Vec<DeferredAction>) {
        let mut state = self.inner.lock().unwrap();

        let mut expired = Vec::new();
        state.pending.retain(|s| {
            if *s.expire.lock().unwrap() < now {
                expired.push(Arc::clone(s));
                false
            } else {
                true
            }
        });

        let mut due = Vec::new();
        let mut keep = Vec::new();
        for action in state.actions.drain(..) {
            let session_expired = expired
                .iter()
                .any(|s| Arc::ptr_eq(s, &action.session));
            if session_expired {
                continue;
            }
            if action.until < now {
                due.push(action);
            } else {
                keep.push(action);
            }
        }
        state.actions = keep;

        (expired, due)
    }

    fn requeue_actions(&self, actions: Vec<DeferredAction>) {
        self.inner.lock().unwrap().actions.extend(actions);
    }

    fn requeue_sessions(&self, sessions: Vec<Arc<Session>>) {
        self.inner.lock().unwrap().pending.extend(sessions);
    }

    #[cfg(test)]
    pub(crate) fn action_count(&self) -> usize {
        self.inner.lock().unwrap().actions.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

impl Tumbler {
    /// Registers a deferred action for the session.
    pub(crate) fn defer_action(
        &self,
        session: &Arc<Session>,
        call: DeferredCall,
        until: Instant,
    ) {
        self.scheduler.defer(DeferredAction {
            session: Arc::clone(session),
            call,
            until,
        });
    }

    /// Background ticker: wakes up once a minute and processes whatever
    /// came due. Runs until shutdown.
    pub(crate) async fn session_ticker(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TumblerError> {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick
        debug!("started session ticker task");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("session ticker cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.tick(Instant::now(), &shutdown).await;
        }
    }

    /// One ticker round: collect due work under the lock, then run the
    /// two batches concurrently with the lock released.
    pub(crate) async fn tick(self: &Arc<Self>, now: Instant, shutdown: &watch::Receiver<bool>) {
        let (expired, actions) = self.scheduler.collect(now);
        trace!(
            "session ticker: {} deferred, {} expired",
            actions.len(),
            expired.len()
        );

        tokio::join!(
            self.run_deferred_actions(actions, shutdown),
            self.expire_sessions(expired, shutdown),
        );
    }

    /// Runs due actions in list order with cooperative cancellation;
    /// anything unprocessed on cancel is re-queued for the next tick.
    async fn run_deferred_actions(
        self: &Arc<Self>,
        actions: Vec<DeferredAction>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let mut iter = actions.into_iter();
        while let Some(action) = iter.next() {
            if *shutdown.borrow() {
                debug!("deferred action processing has been cancelled");
                let rest: Vec<_> = std::iter::once(action).chain(iter).collect();
                self.scheduler.requeue_actions(rest);
                return;
            }
            match &action.call {
                DeferredCall::ValidateOffer(offer) => {
                    action.session.validate_offer(offer).await;
                }
            }
        }
    }

    /// Finalizes expired sessions; anything unprocessed on cancel is
    /// re-queued for the next tick.
    async fn expire_sessions(
        self: &Arc<Self>,
        expired: Vec<Arc<Session>>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let mut iter = expired.into_iter();
        while let Some(session) = iter.next() {
            if *shutdown.borrow() {
                debug!("session expiration processing has been cancelled");
                let rest: Vec<_> = std::iter::once(session).chain(iter).collect();
                self.scheduler.requeue_sessions(rest);
                return;
            }
            session.finalize_exchange(FinalizeReason::SessionExpired, None);
        }
    }
}
