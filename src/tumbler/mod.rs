// =============================================================================
// TUMBLEMIX v0.4 - Tumbler Server
// =============================================================================
//
// The tumbler mediates off-chain between payers and payees with RSA
// puzzles over hash-locked escrow contracts: either a payer pays and a
// payee is paid, or both are refunded, and the two legs can't be linked.
//
// This module wires the server object together:
//   epoch.rs     - epoch windows, puzzle keys, epoch receive addresses
//   session.rs   - per-client exchange state machine
//   promise.rs   - puzzle-promise handlers (payee leg)
//   solver.rs    - puzzle-solver handlers (payer leg)
//   scheduler.rs - deferred actions and session expiration
//
// =============================================================================

pub mod epoch;
pub mod promise;
pub mod scheduler;
pub mod session;
pub mod solver;

#[cfg(test)]
mod tests;

pub use epoch::Epoch;
pub use promise::{
    EscrowOffer, EscrowRequest, SignatureChallenges, SignaturePromises, TransactionDisclosure,
    TransactionSecrets,
};
pub use session::{FinalizeReason, PayeeState, PayerState, Session, State};
pub use solver::{
    PaymentOffer, PuzzleDisclosure, SolutionChallenges, SolutionPromises, SolutionSecrets,
};

use std::collections::HashMap;
use std::sync::atomic::AtomicI32;
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::watch;
use tracing::info;

use crate::contract::ContractError;
use crate::puzzle::PuzzleError;
use crate::tumbler::scheduler::Scheduler;
use crate::wallet::{WalletClient, WalletError};
use crate::ChainParams;

// =============================================================================
// Errors
// =============================================================================

/// Exchange and server errors. Protocol validation failures are mapped to
/// one coarse transport code before leaving the server (see rpc).
#[derive(Clone, Debug, PartialEq)]
pub enum TumblerError {
    /// Requested transition isn't the next step of the session's chain
    NotReady { from: State, to: State },
    /// Session already reached its terminal state
    PastFinalStage(State),
    /// New epoch height isn't strictly increasing
    BadBlockHeight(i32),
    /// No epoch has been created yet
    NoCurrentEpoch,
    /// No epoch at the requested height
    EpochNotFound,
    /// Epoch is about to expire and won't take new work
    EpochTooOld(i32),
    /// Another request is running on the session
    InProgress,
    /// Unknown session cookie
    BadCookie,
    /// Tumbler is shutting down or not running
    ServiceNotReady,
    /// Lengths or values in the request don't line up
    BadInputValues,
    /// Index points outside the negotiated transaction set
    BadTxReference,
    /// Index points outside the negotiated puzzle set
    BadPuzzleReference,
    /// Fake set commitment didn't verify
    FakeSetMismatch,
    /// Real set commitment didn't verify
    RealSetMismatch,
    /// Disclosed dummy transaction didn't verify
    FakeTxMismatch,
    /// Puzzle verification failed
    PuzzleVerification,
    /// Session already has an offer contract
    ConflictingOffer,
    /// Offer transaction fields are missing
    BadOfferTx,
    /// No contract in progress
    NoContract,
    /// Offer transaction wasn't confirmed within the deadline
    OfferNotConfirmed(u64),
    /// Wallet failed while setting up the escrow
    EscrowFailed(WalletError),
    /// Wallet or chain failure
    Wallet(WalletError),
    Puzzle(PuzzleError),
    Contract(ContractError),
    Internal(String),
}

impl std::fmt::Display for TumblerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TumblerError::NotReady { from, to } => {
                write!(f, "not ready to advance to {} from {}", to, from)
            }
            TumblerError::PastFinalStage(to) => {
                write!(f, "cannot advance past the final stage: requested {}", to)
            }
            TumblerError::BadBlockHeight(h) => write!(f, "bad block height: {}", h),
            TumblerError::NoCurrentEpoch => write!(f, "no current epoch"),
            TumblerError::EpochNotFound => write!(f, "no such epoch"),
            TumblerError::EpochTooOld(h) => write!(f, "epoch too old: {}", h),
            TumblerError::InProgress => write!(f, "operation in progress"),
            TumblerError::BadCookie => write!(f, "bad cookie"),
            TumblerError::ServiceNotReady => write!(f, "service not ready"),
            TumblerError::BadInputValues => write!(f, "bad input values"),
            TumblerError::BadTxReference => write!(f, "bad tx reference"),
            TumblerError::BadPuzzleReference => write!(f, "bad puzzle reference"),
            TumblerError::FakeSetMismatch => write!(f, "fake set didn't verify"),
            TumblerError::RealSetMismatch => write!(f, "real set didn't verify"),
            TumblerError::FakeTxMismatch => write!(f, "fake tx didn't verify"),
            TumblerError::PuzzleVerification => write!(f, "puzzles didn't verify"),
            TumblerError::ConflictingOffer => write!(f, "conflicting offer tx"),
            TumblerError::BadOfferTx => write!(f, "bad offer tx"),
            TumblerError::NoContract => write!(f, "no contract in progress"),
            TumblerError::OfferNotConfirmed(secs) => {
                write!(f, "offer tx wasn't confirmed after {} seconds", secs)
            }
            TumblerError::EscrowFailed(e) => write!(f, "failed to set up escrow: {}", e),
            TumblerError::Wallet(e) => write!(f, "wallet failure: {}", e),
            TumblerError::Puzzle(e) => write!(f, "{}", e),
            TumblerError::Contract(e) => write!(f, "{}", e),
            TumblerError::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for TumblerError {}

impl From<PuzzleError> for TumblerError {
    fn from(e: PuzzleError) -> Self {
        TumblerError::Puzzle(e)
    }
}

impl From<ContractError> for TumblerError {
    fn from(e: ContractError) -> Self {
        TumblerError::Contract(e)
    }
}

impl From<WalletError> for TumblerError {
    fn from(e: WalletError) -> Self {
        TumblerError::Wallet(e)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Options needed to initialize a tumbler.
#[derive(Clone, Copy, Debug)]
pub struct TumblerConfig {
    pub chain_params: &'static ChainParams,
    /// Epoch window in blocks.
    pub epoch_duration: i32,
    /// Blocks between consecutive epochs.
    pub epoch_renewal: i32,
    /// RSA modulus size for puzzle keys, in bits.
    pub puzzle_difficulty: usize,
}

impl Default for TumblerConfig {
    fn default() -> Self {
        TumblerConfig {
            chain_params: &crate::MAINNET,
            epoch_duration: crate::EPOCH_DURATION,
            epoch_renewal: crate::EPOCH_RENEWAL,
            puzzle_difficulty: crate::PUZZLE_DIFFICULTY,
        }
    }
}

// =============================================================================
// Tumbler
// =============================================================================

/// An instance of the tumbler server: the epoch list, the session table
/// and the scheduler state, all shared with the background tasks run()
/// spawns.
pub struct Tumbler {
    config: TumblerConfig,
    wallet: Arc<dyn WalletClient>,

    /// Height of the most recent epoch, readable without the epoch lock.
    pub(crate) last_epoch: AtomicI32,
    pub(crate) epochs: StdRwLock<Vec<Arc<Epoch>>>,

    /// Live sessions by cookie.
    sessions: StdRwLock<HashMap<[u8; 16], Arc<Session>>>,

    pub(crate) scheduler: Scheduler,
}

impl Tumbler {
    /// Creates a configured tumbler associated with a wallet service that
    /// provides wallet and blockchain facilities.
    pub fn new(config: TumblerConfig, wallet: Arc<dyn WalletClient>) -> Arc<Tumbler> {
        Arc::new(Tumbler {
            config,
            wallet,
            last_epoch: AtomicI32::new(0),
            epochs: StdRwLock::new(Vec::new()),
            sessions: StdRwLock::new(HashMap::new()),
            scheduler: Scheduler::new(),
        })
    }

    pub fn config(&self) -> &TumblerConfig {
        &self.config
    }

    pub fn chain_params(&self) -> &'static ChainParams {
        self.config.chain_params
    }

    pub(crate) fn wallet(&self) -> &dyn WalletClient {
        self.wallet.as_ref()
    }

    /// Runs the epoch creator and the session ticker until shutdown.
    pub async fn run(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), TumblerError> {
        let creator = tokio::spawn(Arc::clone(self).epoch_creator(shutdown.clone()));
        let ticker = tokio::spawn(Arc::clone(self).session_ticker(shutdown));
        let (creator, ticker) = tokio::join!(creator, ticker);
        creator.map_err(|e| TumblerError::Internal(e.to_string()))??;
        ticker.map_err(|e| TumblerError::Internal(e.to_string()))??;
        Ok(())
    }

    // =========================================================================
    // Session Table
    // =========================================================================

    /// Locates an active exchange by its cookie.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<Session>> {
        if key.len() != 16 {
            return None;
        }
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(key);
        self.sessions.read().unwrap().get(&cookie).cloned()
    }

    /// Removes the session from the lookup table, the expiration list and
    /// the deferred actions list.
    pub(crate) fn disconnect(&self, session: &Session) {
        self.sessions.write().unwrap().remove(&session.cookie);
        self.scheduler.untrack(session);
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

/// Convenience wrapper running a tumbler until the shutdown signal flips.
pub async fn run_tumbler(
    tumbler: Arc<Tumbler>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), TumblerError> {
    info!(
        "starting tumbler on {} with {}-bit puzzles",
        tumbler.chain_params().name,
        tumbler.config().puzzle_difficulty
    );
    tumbler.run(shutdown).await
}
