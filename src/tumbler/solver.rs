// =============================================================================
// TUMBLEMIX v0.4 - Puzzle-Solver Handlers
// =============================================================================
//
// The payer leg of the exchange. A payer who obtained a blinded puzzle
// out-of-band needs the tumbler to solve it, paying for the solution
// through an on-chain offer: a hash-locked output the tumbler can only
// redeem by publishing the very preimages that open the payer's promise.
// A cut-and-choose pass over fake puzzles attests that the tumbler solves
// indiscriminately before the payer commits any funds.
//
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::MutexGuard;
use tracing::debug;

use crate::contract::{AddressRole, Contract};
use crate::puzzle;
use crate::tumbler::scheduler::DeferredCall;
use crate::tumbler::session::{Exchange, PayerState, Session, State};
use crate::tumbler::{FinalizeReason, Tumbler, TumblerError};
use crate::CONFIRMATION_INTERVAL;

/// Asks for promises of solutions to a batch of puzzles under the key of
/// the given epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolutionChallenges {
    pub address: String,
    pub epoch: i32,
    pub puzzles: Vec<Vec<u8>>,
}

/// Solution promises plus hash commitments to their keys. The first
/// payer-role response also carries the session cookie issued at
/// creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolutionPromises {
    pub cookie: [u8; 16],
    pub promises: Vec<Vec<u8>>,
    pub key_hashes: Vec<Vec<u8>>,
}

/// Reveals indexes and blinding factors of the fake puzzles mixed into
/// the challenge set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PuzzleDisclosure {
    pub fake_puzzle_list: Vec<u8>,
    pub fake_factors: Vec<Vec<u8>>,
}

/// Keys for the promises of puzzles the client disclosed as fake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolutionSecrets {
    pub secrets: Vec<Vec<u8>>,
}

/// A payment offer: the client's escrow transaction offering funds for
/// hash preimages, plus the disclosure tying the remaining puzzles to a
/// single blinded puzzle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentOffer {
    pub amount: i64,
    pub public_key: Vec<u8>,
    pub escrow_hash: Vec<u8>,
    pub escrow_script: Vec<u8>,
    pub escrow_tx: Vec<u8>,
    pub puzzle: Vec<u8>,
    pub real_puzzle_list: Vec<u8>,
    pub real_factors: Vec<Vec<u8>>,
}

impl Session {
    /// Solves every submitted puzzle and promises the solutions under
    /// fresh random keys, committing to the keys by their hashes. Starts
    /// the puzzle-solver protocol on a fresh session.
    pub async fn get_solution_promises(
        &self,
        sc: &SolutionChallenges,
    ) -> Result<SolutionPromises, TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payer(PayerState::SolutionsPromised))?;

        let tb = self.tumbler()?;
        let pk = tb.puzzle_key(sc.epoch)?;

        let mut solutions = Vec::with_capacity(sc.puzzles.len());
        let mut promises = Vec::with_capacity(sc.puzzles.len());
        let mut secrets = Vec::with_capacity(sc.puzzles.len());
        for p in &sc.puzzles {
            let (solution, promise, secret) = puzzle::new_solution_promise(&pk, p)?;
            solutions.push(solution);
            promises.push(promise);
            secrets.push(secret);
        }

        // Commit to the generated keys by their hash values.
        let key_hashes = secrets.iter().map(|s| puzzle::key_hash(s)).collect();

        ex.puzzles = sc.puzzles.clone();
        ex.solutions = solutions;
        ex.secrets = secrets;
        ex.epoch = sc.epoch;

        self.advance(State::Payer(PayerState::SolutionsPromised));
        debug!("solution promises offered to {}", self);

        Ok(SolutionPromises {
            cookie: self.cookie(),
            promises,
            key_hashes,
        })
    }

    /// Verifies that the puzzles the client declared fake really are
    /// plain blindings of one, carrying no hidden payload, then reveals
    /// the promise keys for exactly those puzzles.
    pub async fn validate_solutions(
        &self,
        pd: &PuzzleDisclosure,
    ) -> Result<SolutionSecrets, TumblerError> {
        let ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payer(PayerState::SolutionsValidated))?;

        let fake_puzzle_list = puzzle::decode_index_list(&pd.fake_puzzle_list)?;
        if fake_puzzle_list.len() > ex.puzzles.len()
            || fake_puzzle_list.len() != pd.fake_factors.len()
        {
            return Err(TumblerError::BadInputValues);
        }

        let tb = self.tumbler()?;
        let pk = tb.puzzle_key(ex.epoch)?;
        let public = pk.public_key();

        for (i, &idx) in fake_puzzle_list.iter().enumerate() {
            let idx = idx as usize;
            if idx >= ex.puzzles.len() {
                return Err(TumblerError::BadPuzzleReference);
            }
            if !puzzle::validate_puzzle(&public, &ex.puzzles[idx], &pd.fake_factors[i]) {
                return Err(TumblerError::PuzzleVerification);
            }
        }

        // Reveal promise keys for the fake puzzles.
        let mut secrets = Vec::with_capacity(fake_puzzle_list.len());
        for &idx in &fake_puzzle_list {
            let idx = idx as usize;
            if idx >= ex.secrets.len() {
                return Err(TumblerError::BadPuzzleReference);
            }
            secrets.push(ex.secrets[idx].clone());
        }

        self.advance(State::Payer(PayerState::SolutionsValidated));
        debug!("solver proof offered to {}", self);

        Ok(SolutionSecrets { secrets })
    }

    /// Records the payer's offer transaction in a new contract and starts
    /// waiting for its on-chain confirmation. Once confirmed, the
    /// validate_offer continuation reveals the solution preimages on the
    /// blockchain.
    pub async fn payment_offer(self: &Arc<Self>, po: PaymentOffer) -> Result<(), TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payer(PayerState::OfferReceived))?;

        let real_puzzle_list = puzzle::decode_index_list(&po.real_puzzle_list)?;
        if real_puzzle_list.len() > ex.puzzles.len()
            || real_puzzle_list.len() != po.real_factors.len()
        {
            return Err(TumblerError::BadInputValues);
        }

        // Make sure there was no previous offer.
        if ex.contract.is_some() {
            return Err(TumblerError::ConflictingOffer);
        }

        for &idx in &real_puzzle_list {
            if idx as usize >= ex.puzzles.len() {
                return Err(TumblerError::BadPuzzleReference);
            }
        }

        if po.escrow_tx.is_empty() || po.escrow_script.is_empty() || po.escrow_hash.is_empty() {
            return Err(TumblerError::BadOfferTx);
        }

        let tb = self.tumbler()?;
        let lock_time = ex.epoch + tb.config().epoch_duration;
        let mut contract = Contract::new(tb.chain_params(), po.amount, lock_time)?;
        contract.set_address(AddressRole::Sender, &self.address, &po.public_key)?;

        let (epoch_addr, epoch_pubkey) = tb.epoch_address(ex.epoch).await?;
        contract.set_address(AddressRole::Receiver, &epoch_addr, &epoch_pubkey)?;

        contract.escrow_script = po.escrow_script.clone();
        contract.escrow_bytes = po.escrow_tx.clone();
        tb.wallet()
            .import_escrow_script(&mut contract)
            .await
            .map_err(TumblerError::Wallet)?;

        ex.real_puzzle_list = real_puzzle_list.iter().map(|&i| i as usize).collect();
        ex.contract = Some(contract);

        self.advance(State::Payer(PayerState::OfferReceived));
        debug!("payment offer received from {}", self);

        let contract = ex.contract.as_mut().ok_or(TumblerError::NoContract)?;
        let valid = tb
            .wallet()
            .validate_offer(contract, &po.escrow_hash)
            .await
            .map_err(TumblerError::Wallet)?;

        if !valid {
            let now = Instant::now();
            ex.deadline = Some(now + 3 * CONFIRMATION_INTERVAL);
            tb.defer_action(
                self,
                DeferredCall::ValidateOffer(Box::new(po)),
                now + CONFIRMATION_INTERVAL,
            );
            return Ok(());
        }

        self.validate_offer_locked(&tb, &mut ex, &po).await;
        if let Some(err) = self.async_err() {
            return Err(err);
        }
        Ok(())
    }

    /// Scheduler entry point for the deferred confirmation poll. When the
    /// session is busy with a client request the poll is pushed back to
    /// the next tick.
    pub(crate) async fn validate_offer(self: &Arc<Self>, po: &PaymentOffer) {
        let Ok(tb) = self.tumbler() else {
            return;
        };
        let mut ex = match self.exchange.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tb.defer_action(
                    self,
                    DeferredCall::ValidateOffer(Box::new(po.clone())),
                    Instant::now(),
                );
                return;
            }
        };
        self.validate_offer_locked(&tb, &mut ex, po).await;
    }

    /// Continuation of payment_offer: confirms the offer transaction on
    /// chain, verifies the blinding disclosure and publishes the solution
    /// preimages. Every failure path finalizes the exchange; errors are
    /// latched for the caller that can still report them.
    async fn validate_offer_locked(
        self: &Arc<Self>,
        tb: &Arc<Tumbler>,
        ex: &mut MutexGuard<'_, Exchange>,
        po: &PaymentOffer,
    ) {
        if let Err(err) = self.ready(State::Payer(PayerState::SolutionPublished)) {
            self.latch_err(err);
            self.finalize_exchange(FinalizeReason::FailedExchange, None);
            return;
        }

        let contract = match ex.contract.as_mut() {
            Some(contract) => contract,
            None => {
                self.latch_err(TumblerError::NoContract);
                self.finalize_exchange(FinalizeReason::FailedExchange, None);
                return;
            }
        };

        let valid = match tb.wallet().validate_offer(contract, &po.escrow_hash).await {
            Ok(valid) => valid,
            Err(err) => {
                self.latch_err(TumblerError::Wallet(err));
                self.finalize_exchange(FinalizeReason::FailedExchange, None);
                return;
            }
        };

        let now = Instant::now();
        if !valid {
            if ex.deadline.map_or(false, |deadline| now > deadline) {
                self.latch_err(TumblerError::OfferNotConfirmed(
                    (3 * CONFIRMATION_INTERVAL).as_secs(),
                ));
                self.finalize_exchange(FinalizeReason::FailedExchange, None);
                return;
            }
            tb.defer_action(
                self,
                DeferredCall::ValidateOffer(Box::new(po.clone())),
                now + CONFIRMATION_INTERVAL,
            );
            return;
        }

        let secrets = match self.reveal_solution_locked(tb, ex, po) {
            Ok(secrets) => secrets,
            Err(err) => {
                self.latch_err(err);
                self.finalize_exchange(FinalizeReason::FailedExchange, None);
                return;
            }
        };

        if let Err(err) = self.publish_solution(tb, ex, &secrets).await {
            self.latch_err(err);
            self.finalize_exchange(FinalizeReason::FailedExchange, None);
        }
    }

    /// Completes the puzzle-solver protocol: checks that every remaining
    /// puzzle is a blinding of the single puzzle in the offer and
    /// collects the matching promise keys. The keys MUST NOT be sent to
    /// the client; they only ever reach it through the fulfilling
    /// transaction on the blockchain.
    pub fn reveal_solution(
        &self,
        po: &PaymentOffer,
    ) -> Result<Vec<Vec<u8>>, TumblerError> {
        let ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        let tb = self.tumbler()?;
        self.reveal_solution_locked(&tb, &ex, po)
    }

    fn reveal_solution_locked(
        &self,
        tb: &Arc<Tumbler>,
        ex: &Exchange,
        po: &PaymentOffer,
    ) -> Result<Vec<Vec<u8>>, TumblerError> {
        let pk = tb.puzzle_key(ex.epoch)?;
        let public = pk.public_key();

        if ex.real_puzzle_list.len() != po.real_factors.len() {
            return Err(TumblerError::BadInputValues);
        }
        for (i, &idx) in ex.real_puzzle_list.iter().enumerate() {
            if idx >= ex.puzzles.len() {
                return Err(TumblerError::BadPuzzleReference);
            }
            if !puzzle::validate_blinded_puzzle(
                &public,
                &ex.puzzles[idx],
                &po.puzzle,
                &po.real_factors[i],
            ) {
                return Err(TumblerError::PuzzleVerification);
            }
        }

        // Reveal promise keys for the real puzzles.
        let mut secrets = Vec::with_capacity(ex.real_puzzle_list.len());
        for &idx in &ex.real_puzzle_list {
            if idx >= ex.secrets.len() {
                return Err(TumblerError::BadPuzzleReference);
            }
            secrets.push(ex.secrets[idx].clone());
        }
        Ok(secrets)
    }

    /// Publishes the preimages fulfilling the offer transaction and wraps
    /// up the payer leg.
    async fn publish_solution(
        self: &Arc<Self>,
        tb: &Arc<Tumbler>,
        ex: &mut MutexGuard<'_, Exchange>,
        secrets: &[Vec<u8>],
    ) -> Result<(), TumblerError> {
        let contract = ex.contract.as_mut().ok_or(TumblerError::NoContract)?;
        tb.wallet()
            .publish_solution(contract, secrets)
            .await
            .map_err(TumblerError::Wallet)?;

        self.advance(State::Payer(PayerState::SolutionPublished));
        debug!("solution published for {}", self);

        self.finalize_exchange(FinalizeReason::Success, None);
        Ok(())
    }
}
