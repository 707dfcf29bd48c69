// =============================================================================
// TUMBLEMIX v0.4 - Sessions & Exchange State Machine
// =============================================================================
//
// A session tracks one client's exchange. The first transition out of the
// initial state commits the session to one of two roles for the rest of
// its life:
//
//   payee chain:  Initial -> EscrowComplete -> PuzzlesPromised
//                         -> PuzzlesValidated -> EscrowPublished
//   payer chain:  Initial -> SolutionsPromised -> SolutionsValidated
//                         -> OfferReceived -> SolutionPublished
//
// Transitions only ever move one step forward along the chosen chain and
// stop dead at the terminal states. Cross-chain transitions don't typecheck.
//
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::contract::Contract;
use crate::tumbler::{Tumbler, TumblerError};

// =============================================================================
// States
// =============================================================================

/// Stages of the puzzle-promise exchange with a payee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayeeState {
    EscrowComplete,
    PuzzlesPromised,
    PuzzlesValidated,
    EscrowPublished,
}

/// Stages of the puzzle-solver exchange with a payer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayerState {
    SolutionsPromised,
    SolutionsValidated,
    OfferReceived,
    SolutionPublished,
}

/// Exchange state; the role is picked by the first transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Initial,
    Payee(PayeeState),
    Payer(PayerState),
}

impl State {
    /// The only state a non-initial, non-terminal state may advance to.
    fn successor(self) -> Option<State> {
        match self {
            State::Initial => None,
            State::Payee(s) => match s {
                PayeeState::EscrowComplete => Some(State::Payee(PayeeState::PuzzlesPromised)),
                PayeeState::PuzzlesPromised => Some(State::Payee(PayeeState::PuzzlesValidated)),
                PayeeState::PuzzlesValidated => Some(State::Payee(PayeeState::EscrowPublished)),
                PayeeState::EscrowPublished => None,
            },
            State::Payer(s) => match s {
                PayerState::SolutionsPromised => {
                    Some(State::Payer(PayerState::SolutionsValidated))
                }
                PayerState::SolutionsValidated => Some(State::Payer(PayerState::OfferReceived)),
                PayerState::OfferReceived => Some(State::Payer(PayerState::SolutionPublished)),
                PayerState::SolutionPublished => None,
            },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Payee(PayeeState::EscrowPublished) | State::Payer(PayerState::SolutionPublished)
        )
    }

    fn name(&self) -> &'static str {
        match self {
            State::Initial => "InitialState",
            State::Payee(PayeeState::EscrowComplete) => "EscrowComplete",
            State::Payee(PayeeState::PuzzlesPromised) => "PuzzlesPromised",
            State::Payee(PayeeState::PuzzlesValidated) => "PuzzlesValidated",
            State::Payee(PayeeState::EscrowPublished) => "EscrowPublished",
            State::Payer(PayerState::SolutionsPromised) => "SolutionsPromised",
            State::Payer(PayerState::SolutionsValidated) => "SolutionsValidated",
            State::Payer(PayerState::OfferReceived) => "OfferReceived",
            State::Payer(PayerState::SolutionPublished) => "SolutionPublished",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Finalization Reasons
// =============================================================================

/// Why an exchange is being torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Exchange has completed successfully
    Success,
    /// Aborting due to a session expiration timeout
    SessionExpired,
    /// Aborting due to an issue during the exchange
    FailedExchange,
    /// Aborting due to an internal error
    InternalError,
}

impl FinalizeReason {
    fn name(&self) -> &'static str {
        match self {
            FinalizeReason::Success => "exchange was completed",
            FinalizeReason::SessionExpired => "expiration timeout",
            FinalizeReason::FailedExchange => "exchange error",
            FinalizeReason::InternalError => "internal error",
        }
    }
}

impl std::fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Session
// =============================================================================

/// Scratch state of the exchange, guarded by the session's serialization
/// lock: at most one request operates on it at a time.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    /// Selected epoch height.
    pub epoch: i32,
    /// Contract in progress.
    pub contract: Option<Contract>,
    /// Puzzles currently being negotiated and their companions, indexed
    /// by request position.
    pub puzzles: Vec<Vec<u8>>,
    pub secrets: Vec<Vec<u8>>,
    pub solutions: Vec<Vec<u8>>,
    pub tx_hashes: Vec<Vec<u8>>,
    /// Salted commitments to the real and fake index sets.
    pub real_set_hash: Vec<u8>,
    pub fake_set_hash: Vec<u8>,
    /// Decoded real puzzle indexes.
    pub real_puzzle_list: Vec<usize>,
    /// Cumulative deadline for staged deferred work.
    pub deadline: Option<Instant>,
}

/// State of the exchange with one connected client.
pub struct Session {
    /// Identification cookie, unique among live sessions.
    pub(crate) cookie: [u8; 16],
    /// Owning tumbler; sessions never outlive it.
    pub(crate) tumbler: Weak<Tumbler>,
    /// Client's external address.
    pub(crate) address: String,
    /// When the ticker gives up on this exchange.
    pub(crate) expire: StdMutex<Instant>,
    /// Current state; kept outside the serialization lock so that
    /// finalization can consult it without blocking on a wallet call.
    pub(crate) state: StdMutex<State>,
    /// Finalization semaphore: exactly one cleanup runs.
    finalized: AtomicBool,
    /// Latched asynchronous error from deferred work.
    pub(crate) async_err: StdMutex<Option<TumblerError>>,
    /// Serialization lock around the exchange scratch state.
    pub(crate) exchange: AsyncMutex<Exchange>,
}

impl Session {
    /// Creates a session bound to the tumbler, issues a unique cookie,
    /// installs it in the lookup table and puts it on the expiration list.
    pub fn new(tb: &Arc<Tumbler>, address: &str) -> Arc<Session> {
        // Conservative bound covering the longest legitimate exchange.
        let expire = Instant::now()
            + crate::CONFIRMATION_INTERVAL * (tb.config().epoch_duration + 1) as u32;

        let mut sessions = tb.sessions.write().unwrap();
        let mut cookie = [0u8; 16];
        loop {
            rand::thread_rng().fill_bytes(&mut cookie);
            if !sessions.contains_key(&cookie) {
                break;
            }
        }
        let session = Arc::new(Session {
            cookie,
            tumbler: Arc::downgrade(tb),
            address: address.to_string(),
            expire: StdMutex::new(expire),
            state: StdMutex::new(State::Initial),
            finalized: AtomicBool::new(false),
            async_err: StdMutex::new(None),
            exchange: AsyncMutex::new(Exchange::default()),
        });
        sessions.insert(cookie, Arc::clone(&session));
        drop(sessions);

        tb.scheduler.track(Arc::clone(&session));
        info!("new session for {}", session);
        session
    }

    pub fn cookie(&self) -> [u8; 16] {
        self.cookie
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub(crate) fn advance(&self, next: State) {
        *self.state.lock().unwrap() = next;
    }

    pub(crate) fn tumbler(&self) -> Result<Arc<Tumbler>, TumblerError> {
        self.tumbler.upgrade().ok_or(TumblerError::ServiceNotReady)
    }

    /// Checks whether the exchange may advance to `next`. Called by every
    /// handler before doing any work; an error leaves the state untouched.
    pub(crate) fn ready(&self, next: State) -> Result<(), TumblerError> {
        let current = self.state();
        match current {
            State::Initial => {
                if matches!(
                    next,
                    State::Payee(PayeeState::EscrowComplete)
                        | State::Payer(PayerState::SolutionsPromised)
                ) {
                    return Ok(());
                }
            }
            s if s.is_terminal() => {
                return Err(TumblerError::PastFinalStage(next));
            }
            s => {
                if s.successor() == Some(next) {
                    return Ok(());
                }
            }
        }
        Err(TumblerError::NotReady {
            from: current,
            to: next,
        })
    }

    pub(crate) fn latch_err(&self, err: TumblerError) {
        *self.async_err.lock().unwrap() = Some(err);
    }

    pub fn async_err(&self) -> Option<TumblerError> {
        self.async_err.lock().unwrap().clone()
    }

    /// Tears the exchange down: exactly one caller wins the finalization
    /// semaphore and detaches the session from the tumbler's cookie map,
    /// expiration list and deferred actions. Finalizing with Success from
    /// a non-terminal state is a server bug and aborts.
    pub fn finalize_exchange(&self, reason: FinalizeReason, details: Option<&TumblerError>) {
        if reason == FinalizeReason::Success && !self.state().is_terminal() {
            panic!("no reason for success");
        }

        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(tb) = self.tumbler.upgrade() {
            tb.disconnect(self);
        }

        let mut message = format!("finalizing exchange for {}", self);
        if reason != FinalizeReason::Success {
            message.push_str(&format!(" due to {}", reason));
        }
        if let Some(details) = details {
            message.push_str(&format!(": {}", details));
        }
        if let Some(err) = self.async_err.lock().unwrap().as_ref() {
            message.push_str(&format!(": {}", err));
        }
        if reason == FinalizeReason::Success {
            info!("{}", message);
        } else {
            warn!("{}", message);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.is_empty() {
            write!(f, "id {} state {}", hex::encode(self.cookie), self.state())?;
        } else {
            write!(
                f,
                "{} id {} state {}",
                self.address,
                hex::encode(self.cookie),
                self.state()
            )?;
        }
        let expire = *self.expire.lock().unwrap();
        let now = Instant::now();
        if expire <= now {
            write!(f, " expired")
        } else {
            write!(f, " expires in {}s", (expire - now).as_secs())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_chains() {
        // Payee chain walks forward one state at a time.
        let mut state = State::Payee(PayeeState::EscrowComplete);
        let mut seen = vec![state];
        while let Some(next) = state.successor() {
            seen.push(next);
            state = next;
        }
        assert_eq!(seen.len(), 4);
        assert!(state.is_terminal());

        let mut state = State::Payer(PayerState::SolutionsPromised);
        while let Some(next) = state.successor() {
            state = next;
        }
        assert_eq!(state, State::Payer(PayerState::SolutionPublished));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(State::Initial.to_string(), "InitialState");
        assert_eq!(
            State::Payee(PayeeState::PuzzlesPromised).to_string(),
            "PuzzlesPromised"
        );
        assert_eq!(
            State::Payer(PayerState::SolutionPublished).to_string(),
            "SolutionPublished"
        );
    }
}
