// =============================================================================
// TUMBLEMIX v0.4 - Puzzle-Promise Handlers
// =============================================================================
//
// The payee leg of the exchange. The tumbler escrows funds redeemable
// with its own signatures, then convinces the payee it will sign the
// cash-out transaction when presented, without revealing anything about
// the signatures themselves: every signature is locked behind an RSA
// puzzle, a cut-and-choose pass over dummy transactions proves the
// tumbler signs indiscriminately, and a quotient chain ties the real
// puzzles together.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{AddressRole, Contract};
use crate::puzzle;
use crate::tumbler::session::{PayeeState, Session, State};
use crate::tumbler::{FinalizeReason, TumblerError};

/// Asks the tumbler to escrow the specified amount redeemable by the
/// owner of the public key in case it obtains a correct puzzle solution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowRequest {
    pub address: String,
    pub public_key: Vec<u8>,
    pub amount: i64,
}

/// Presents the client with a signed but not yet published escrow
/// transaction set up for a particular epoch and locktime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowOffer {
    pub epoch: i32,
    pub lock_time: i32,
    pub address: String,
    pub public_key: Vec<u8>,
    pub escrow_script: Vec<u8>,
    pub escrow_tx: Vec<u8>,
}

/// Requests signature promises for the given transaction hashes, some of
/// which are dummies as committed by `fake_set_hash`, the rest legitimate
/// as committed by `real_set_hash`. The commitments prove the client
/// mixed both sets before seeing any promises.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureChallenges {
    pub fake_set_hash: Vec<u8>,
    pub real_set_hash: Vec<u8>,
    pub transaction_hashes: Vec<Vec<u8>>,
    pub signatures: Vec<Vec<u8>>,
    pub public_key: Vec<u8>,
}

/// Signature promises for the challenged transactions along with the
/// puzzles that unlock them once solved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignaturePromises {
    pub public_key: Vec<u8>,
    pub puzzle_key: Vec<u8>,
    pub puzzles: Vec<Vec<u8>>,
    pub promises: Vec<Vec<u8>>,
}

/// Reveals which challenged transactions were dummies, together with the
/// pads they were built from and the commitment salt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionDisclosure {
    pub fake_tx_list: Vec<u8>,
    pub real_tx_list: Vec<u8>,
    pub random_pads: Vec<Vec<u8>>,
    pub salt: Vec<u8>,
}

/// Proof that the tumbler signed all transactions indiscriminately: the
/// secrets behind every dummy promise and a quotient chain over the
/// secrets of the real set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionSecrets {
    pub secrets: Vec<Vec<u8>>,
    pub quotients: Vec<Vec<u8>>,
}

impl Session {
    /// Creates and signs a transaction that escrows tumbler funds for an
    /// epoch duration. The escrow is a P2SH output that needs signatures
    /// from both the client and the tumbler to move the funds.
    pub async fn setup_escrow(&self, er: &EscrowRequest) -> Result<EscrowOffer, TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payee(PayeeState::EscrowComplete))?;

        let tb = self.tumbler()?;
        let epoch = tb.current_epoch()?;
        let lock_time = epoch + tb.config().epoch_duration;

        let mut contract = Contract::new(tb.chain_params(), er.amount, lock_time)?;
        contract.set_address(AddressRole::Receiver, &er.address, &er.public_key)?;

        tb.wallet()
            .create_escrow(&mut contract)
            .await
            .map_err(TumblerError::EscrowFailed)?;
        ex.epoch = epoch;

        let offer = EscrowOffer {
            epoch,
            lock_time,
            address: contract.sender_addr_str.clone(),
            public_key: contract.sender_script_addr.clone(),
            escrow_script: contract.escrow_script.clone(),
            escrow_tx: contract.escrow_bytes.clone(),
        };
        ex.contract = Some(contract);

        self.advance(State::Payee(PayeeState::EscrowComplete));
        debug!("escrow setup for {}", self);
        Ok(offer)
    }

    /// Asks the wallet to sign challenge hash values. Kept separate from
    /// get_puzzle_promises so the exchange remains testable without a
    /// wallet in the loop.
    pub async fn sign_challenge_hashes(
        &self,
        hashes: &[Vec<u8>],
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>), TumblerError> {
        let ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        let contract = ex.contract.as_ref().ok_or(TumblerError::NoContract)?;
        let tb = self.tumbler()?;
        let (signatures, pubkey) = tb
            .wallet()
            .sign_hashes(contract, hashes)
            .await
            .map_err(TumblerError::Wallet)?;
        Ok((signatures, pubkey))
    }

    /// Turns each submitted signature into a puzzle promise: the starting
    /// point of the puzzle-promise fairness test.
    pub async fn get_puzzle_promises(
        &self,
        cp: &SignatureChallenges,
    ) -> Result<SignaturePromises, TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payee(PayeeState::PuzzlesPromised))?;

        if cp.signatures.len() != cp.transaction_hashes.len() {
            return Err(TumblerError::BadInputValues);
        }

        let tb = self.tumbler()?;
        let pk = tb.puzzle_key(ex.epoch)?;
        let marshalled = puzzle::marshal_pub_key(&pk);

        let mut puzzles = Vec::with_capacity(cp.signatures.len());
        let mut promises = Vec::with_capacity(cp.signatures.len());
        let mut secrets = Vec::with_capacity(cp.signatures.len());
        for signature in &cp.signatures {
            let (z, promise, secret) = puzzle::new_puzzle_promise(&pk, signature)?;
            puzzles.push(z);
            promises.push(promise);
            secrets.push(secret);
        }

        ex.secrets = secrets;
        ex.real_set_hash = cp.real_set_hash.clone();
        ex.fake_set_hash = cp.fake_set_hash.clone();
        ex.tx_hashes = cp.transaction_hashes.clone();

        self.advance(State::Payee(PayeeState::PuzzlesPromised));
        debug!("puzzle promises offered to {}", self);

        Ok(SignaturePromises {
            public_key: cp.public_key.clone(),
            puzzle_key: marshalled,
            puzzles,
            promises,
        })
    }

    /// Validates the cut-and-choose disclosure and proves fairness back.
    ///
    /// The client reveals which challenge transactions were dummies. If
    /// every disclosed dummy checks out against its commitment, the
    /// tumbler discloses the secrets of the dummy promises, proving it
    /// signed them faithfully, and a quotient chain over the remaining
    /// secrets that the client verifies against the real puzzles.
    pub async fn validate_puzzles(
        &self,
        cd: &TransactionDisclosure,
    ) -> Result<TransactionSecrets, TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payee(PayeeState::PuzzlesValidated))?;

        let fake_tx_list = puzzle::decode_index_list(&cd.fake_tx_list)?;
        let real_tx_list = puzzle::decode_index_list(&cd.real_tx_list)?;

        if fake_tx_list.len() > ex.tx_hashes.len()
            || real_tx_list.len() > ex.tx_hashes.len()
            || cd.random_pads.len() > ex.tx_hashes.len()
            || fake_tx_list.len() > cd.random_pads.len()
            || cd.salt.len() != 32
        {
            return Err(TumblerError::BadInputValues);
        }

        let tb = self.tumbler()?;
        let pk = tb.puzzle_key(ex.epoch)?;

        // Verify the commitment to the fake set.
        let fake_set_hash = puzzle::hash_index_list(&cd.salt, &fake_tx_list)?;
        if fake_set_hash != ex.fake_set_hash {
            return Err(TumblerError::FakeSetMismatch);
        }

        // Verify the structure of the fake transactions.
        for (i, &idx) in fake_tx_list.iter().enumerate() {
            let idx = idx as usize;
            if idx >= ex.tx_hashes.len() {
                return Err(TumblerError::BadTxReference);
            }
            if cd.random_pads[i].len() != 32 {
                return Err(TumblerError::BadInputValues);
            }
            let fkh = puzzle::fake_tx_format(&cd.random_pads[i]);
            if fkh != ex.tx_hashes[idx] {
                return Err(TumblerError::FakeTxMismatch);
            }
        }

        // Verify the commitment to the real set.
        let real_set_hash = puzzle::hash_index_list(&cd.salt, &real_tx_list)?;
        if real_set_hash != ex.real_set_hash {
            return Err(TumblerError::RealSetMismatch);
        }

        // Reveal secrets for the fake set.
        let mut fake_secrets = Vec::with_capacity(fake_tx_list.len());
        for &idx in &fake_tx_list {
            fake_secrets.push(ex.secrets[idx as usize].clone());
        }

        // Chain up the secrets of the real set.
        let mut real_secrets = Vec::with_capacity(real_tx_list.len());
        for &idx in &real_tx_list {
            let idx = idx as usize;
            if idx >= ex.secrets.len() {
                return Err(TumblerError::BadTxReference);
            }
            real_secrets.push(ex.secrets[idx].clone());
        }
        let quotients = puzzle::quotients(&pk.public_key(), &real_secrets)?;

        // Drop scratch state the exchange no longer needs.
        ex.puzzles = Vec::new();
        ex.tx_hashes = Vec::new();
        ex.real_set_hash = Vec::new();
        ex.fake_set_hash = Vec::new();

        self.advance(State::Payee(PayeeState::PuzzlesValidated));
        debug!("promise proof offered to {}", self);

        Ok(TransactionSecrets {
            secrets: fake_secrets,
            quotients,
        })
    }

    /// Publishes the escrow transaction onto the blockchain and wraps up
    /// the payee leg.
    pub async fn finalize_escrow(&self) -> Result<Vec<u8>, TumblerError> {
        let mut ex = self
            .exchange
            .try_lock()
            .map_err(|_| TumblerError::InProgress)?;
        self.ready(State::Payee(PayeeState::EscrowPublished))?;

        let tb = self.tumbler()?;
        let contract = ex.contract.as_mut().ok_or(TumblerError::NoContract)?;
        tb.wallet()
            .publish_escrow(contract)
            .await
            .map_err(TumblerError::Wallet)?;
        let escrow_hash = contract.escrow_hash.clone();

        self.advance(State::Payee(PayeeState::EscrowPublished));
        debug!("escrow published for {}", self);

        drop(ex);
        self.finalize_exchange(FinalizeReason::Success, None);

        Ok(escrow_hash)
    }
}
