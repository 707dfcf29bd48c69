// =============================================================================
// TUMBLEMIX v0.4 - Wallet Interface
// =============================================================================
//
// The tumbler delegates every chain interaction to a wallet service:
// address derivation, escrow construction and signing, transaction
// publication and confirmation queries. This module defines that seam and
// a scriptable in-memory implementation for tests.
//
// =============================================================================

use async_trait::async_trait;

use crate::contract::{Contract, ContractError};

/// Wallet and blockchain facilities consumed by the tumbler.
///
/// Implementations talk to an actual wallet over RPC and are expected to
/// fill in the contract scratchpad fields the same way the methods here
/// document. Confirmation queries report `false` until a transaction has
/// seen CONFIRMATION_THRESHOLD confirmations.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Height of the current best block.
    async fn current_block_height(&self) -> Result<u32, WalletError>;

    /// Derives the next external (receiving) address and its public key.
    async fn next_external_address(&self) -> Result<(String, Vec<u8>), WalletError>;

    /// Derives the next internal (change) address and its public key.
    async fn next_internal_address(&self) -> Result<(String, Vec<u8>), WalletError>;

    /// Signs a bundle of transaction hashes with the key behind the
    /// contract's sender address. Returns the signatures and the public
    /// key they verify under.
    async fn sign_hashes(
        &self,
        con: &Contract,
        hashes: &[Vec<u8>],
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>), WalletError>;

    /// Constructs and signs the escrow transaction paying the contract
    /// amount into the escrow script, along with the associated refund
    /// transaction. Fills the sender/refund slots of the contract.
    async fn create_escrow(&self, con: &mut Contract) -> Result<(), WalletError>;

    /// Imports the contract's escrow script so the wallet can recognize
    /// and spend the P2SH output.
    async fn import_escrow_script(&self, con: &mut Contract) -> Result<(), WalletError>;

    /// Looks up the client's escrow transaction and reports whether it is
    /// sufficiently confirmed on the blockchain.
    async fn validate_offer(
        &self,
        con: &mut Contract,
        escrow_hash: &[u8],
    ) -> Result<bool, WalletError>;

    /// Broadcasts the escrow transaction; records its hash on the
    /// contract.
    async fn publish_escrow(&self, con: &mut Contract) -> Result<(), WalletError>;

    /// Builds and broadcasts the fulfilling transaction revealing the
    /// given preimages, spending the payer's offer output.
    async fn publish_solution(
        &self,
        con: &mut Contract,
        secrets: &[Vec<u8>],
    ) -> Result<(), WalletError>;

    /// Broadcasts the refund transaction; records its hash on the
    /// contract.
    async fn publish_refund(&self, con: &mut Contract) -> Result<(), WalletError>;
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletError {
    /// RPC transport failure
    Rpc(String),
    /// Requested object isn't known to the wallet
    NotFound,
    /// Wallet runs on a different network
    NetworkMismatch,
    /// Contract manipulation failed inside a wallet operation
    Contract(ContractError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::Rpc(m) => write!(f, "wallet rpc failure: {}", m),
            WalletError::NotFound => write!(f, "not found"),
            WalletError::NetworkMismatch => write!(f, "network mismatch"),
            WalletError::Contract(e) => write!(f, "wallet contract failure: {}", e),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<ContractError> for WalletError {
    fn from(e: ContractError) -> Self {
        WalletError::Contract(e)
    }
}

// =============================================================================
// Mock Wallet
// =============================================================================
