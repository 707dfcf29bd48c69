// =============================================================================
// TUMBLEMIX v0.4 - Contracts
// =============================================================================
//
// Storage for and basic manipulations with the on-chain contracts used by
// the exchange: the 2-of-2 escrow the tumbler funds for the payee and the
// hash-locked offer the payer funds for the tumbler, together with their
// refund and redeem transactions.
//
// Layout:
//   opcodes.rs  - opcode table and push encoding
//   engine.rs   - stack VM + verification flags
//   script.rs   - script templates and contract transaction building
//   tx.rs       - wire transactions, size estimation, fees
//
// =============================================================================

pub mod engine;
pub mod opcodes;
pub mod script;
pub mod tx;

pub use engine::{ExecutionContext, ScriptEngine, ScriptError, STANDARD_VERIFY_FLAGS};
pub use opcodes::Opcode;
pub use script::ScriptBuilder;
pub use tx::{OutPoint, Transaction, TxIn, TxOut};

use num_bigint::BigUint;
use num_traits::Zero;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{ChainParams, UNIT_VALUE};

/// RIPEMD160(SHA256(data)), the script-level address hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(Sha256::digest(data)));
    out
}

/// Double SHA-256.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractError {
    /// Contract amounts are pinned to the single supported denomination
    BadAmount(i64),
    /// Address string didn't decode
    BadAddress(String),
    /// Address and public key don't match
    AddressMismatch,
    /// Address has the wrong type for its role
    WrongAddressType(String),
    /// Escrow transaction doesn't pay to the contract script
    MissingEscrowOutput,
    /// Escrow transaction bytes are missing or malformed
    BadEscrowTx,
    /// Output value below the relay dust threshold
    DustOutput(i64),
    /// Script simulation failed
    Script(ScriptError),
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractError::BadAmount(v) => write!(f, "attempted contract amount: {}", v),
            ContractError::BadAddress(a) => write!(f, "failed to decode address: {}", a),
            ContractError::AddressMismatch => {
                write!(f, "address and public key don't match")
            }
            ContractError::WrongAddressType(a) => {
                write!(f, "address {} is not a supported P2PKH", a)
            }
            ContractError::MissingEscrowOutput => {
                write!(f, "transaction does not contain a contract output")
            }
            ContractError::BadEscrowTx => write!(f, "failed to deserialize escrow tx"),
            ContractError::DustOutput(v) => {
                write!(f, "output value of {} is dust", v)
            }
            ContractError::Script(e) => write!(f, "script didn't verify: {}", e),
        }
    }
}

impl std::error::Error for ContractError {}

impl From<ScriptError> for ContractError {
    fn from(e: ScriptError) -> Self {
        ContractError::Script(e)
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// Roles an address can play within a contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressRole {
    Receiver,
    Redeem,
    Refund,
    Sender,
}

impl AddressRole {
    fn name(&self) -> &'static str {
        match self {
            AddressRole::Receiver => "receiver",
            AddressRole::Redeem => "redeem",
            AddressRole::Refund => "refund",
            AddressRole::Sender => "sender",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    PayToPubKeyHash,
    PayToScriptHash,
}

/// A decoded base58check address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

impl Address {
    pub fn p2pkh_from_pubkey(pubkey: &[u8]) -> Self {
        Address {
            kind: AddressKind::PayToPubKeyHash,
            hash: hash160(pubkey),
        }
    }

    pub fn p2sh_from_script(script: &[u8]) -> Self {
        Address {
            kind: AddressKind::PayToScriptHash,
            hash: hash160(script),
        }
    }

    /// Base58check string form under the given network parameters.
    pub fn encode(&self, params: &ChainParams) -> String {
        let version = match self.kind {
            AddressKind::PayToPubKeyHash => params.p2pkh_version,
            AddressKind::PayToScriptHash => params.p2sh_version,
        };
        encode_base58check(version, &self.hash)
    }

    /// Decodes a base58check address, checking its version byte against
    /// the network parameters.
    pub fn decode(s: &str, params: &ChainParams) -> Result<Self, ContractError> {
        let (version, payload) =
            decode_base58check(s).ok_or_else(|| ContractError::BadAddress(s.to_string()))?;
        if payload.len() != 20 {
            return Err(ContractError::BadAddress(s.to_string()));
        }
        let kind = if version == params.p2pkh_version {
            AddressKind::PayToPubKeyHash
        } else if version == params.p2sh_version {
            AddressKind::PayToScriptHash
        } else {
            return Err(ContractError::BadAddress(s.to_string()));
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload);
        Ok(Address { kind, hash })
    }
}

// =============================================================================
// Base58Check
// =============================================================================

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn encode_base58check(version: u8, data: &[u8]) -> String {
    let mut payload = vec![version];
    payload.extend_from_slice(data);
    let checksum = hash256(&payload);
    payload.extend_from_slice(&checksum[0..4]);

    let leading_zeros = payload.iter().take_while(|b| **b == 0).count();

    let mut num = payload.iter().fold(BigUint::zero(), |acc, &b| {
        acc * 256u32 + b as u32
    });
    let fifty_eight = BigUint::from(58u32);

    let mut result = String::new();
    while !num.is_zero() {
        let rem = (&num % &fifty_eight).to_u32_digits();
        let idx = if rem.is_empty() { 0 } else { rem[0] as usize };
        result.push(BASE58_ALPHABET[idx] as char);
        num /= &fifty_eight;
    }
    for _ in 0..leading_zeros {
        result.push('1');
    }
    result.chars().rev().collect()
}

fn decode_base58check(s: &str) -> Option<(u8, Vec<u8>)> {
    let fifty_eight = BigUint::from(58u32);
    let mut num = BigUint::zero();
    let mut leading_ones = 0;
    let mut seen_nonzero = false;
    for c in s.bytes() {
        let idx = BASE58_ALPHABET.iter().position(|b| *b == c)? as u32;
        if idx == 0 && !seen_nonzero {
            leading_ones += 1;
        } else {
            seen_nonzero = true;
        }
        num = num * &fifty_eight + idx;
    }

    let mut payload = vec![0u8; leading_ones];
    payload.extend_from_slice(&num.to_bytes_be());
    if payload.len() < 5 {
        return None;
    }

    let (body, checksum) = payload.split_at(payload.len() - 4);
    if hash256(body)[0..4] != *checksum {
        return None;
    }
    Some((body[0], body[1..].to_vec()))
}

// =============================================================================
// Contract
// =============================================================================

/// Scratchpad for one client's on-chain contract: the escrow output plus
/// the refund and redeem transactions that spend it. Owned exclusively by
/// the session driving the exchange.
#[derive(Clone, Debug, Default)]
pub struct Contract {
    // Generic sender and receiver of funds. Script addresses hold the
    // serialized public keys since the contract branches check signatures
    // against the keys themselves.
    pub sender_addr_str: String,
    pub sender_script_addr: Vec<u8>,
    pub receiver_addr_str: String,
    pub receiver_script_addr: Vec<u8>,

    // Escrow set up by the tumbler or the client.
    pub escrow_tx: Option<Transaction>,
    pub escrow_bytes: Vec<u8>,
    pub escrow_addr_str: String,
    pub escrow_pay_script: Vec<u8>,
    pub escrow_script: Vec<u8>,
    pub escrow_sig: Vec<u8>,
    pub escrow_hash: Vec<u8>,

    // Refunding transaction used with an escrow the tumbler sets up.
    pub refund_tx: Option<Transaction>,
    pub refund_bytes: Vec<u8>,
    pub refund_addr_str: String,
    pub refund_script_addr: Vec<u8>,
    pub refund_script: Vec<u8>,
    pub refund_sig: Vec<u8>,
    pub refund_hash: Vec<u8>,

    // Fulfills the offer transaction and redeems escrowed funds.
    pub redeem_tx: Option<Transaction>,
    pub redeem_bytes: Vec<u8>,
    pub redeem_addr_str: String,
    pub redeem_script_addr: Vec<u8>,
    pub redeem_script: Vec<u8>,
    pub redeem_sig: Vec<u8>,
    pub redeem_hash: Vec<u8>,

    pub amount: i64,
    pub lock_time: i32,
    pub chain_params: Option<&'static ChainParams>,
}

impl Contract {
    /// Creates a contract template for the fixed unit amount that becomes
    /// refundable after `lock_time`.
    pub fn new(
        chain_params: &'static ChainParams,
        amount: i64,
        lock_time: i32,
    ) -> Result<Contract, ContractError> {
        if amount != UNIT_VALUE {
            return Err(ContractError::BadAmount(amount));
        }
        Ok(Contract {
            amount,
            lock_time,
            chain_params: Some(chain_params),
            ..Default::default()
        })
    }

    fn params(&self) -> &'static ChainParams {
        self.chain_params.unwrap_or(&crate::MAINNET)
    }

    /// Installs an address for the given role. The address must decode
    /// under the contract's network and match the supplied public key.
    /// Sender and receiver store the key itself (the contract branches
    /// verify against it); refund and redeem store the key hash.
    pub fn set_address(
        &mut self,
        role: AddressRole,
        address: &str,
        pubkey: &[u8],
    ) -> Result<(), ContractError> {
        let decoded = Address::decode(address, self.params()).map_err(|_| {
            ContractError::BadAddress(format!("{} ({})", address, role.name()))
        })?;
        if decoded.kind != AddressKind::PayToPubKeyHash {
            return Err(ContractError::WrongAddressType(address.to_string()));
        }
        if hash160(pubkey) != decoded.hash {
            return Err(ContractError::AddressMismatch);
        }

        match role {
            AddressRole::Sender => {
                self.sender_addr_str = address.to_string();
                self.sender_script_addr = pubkey.to_vec();
            }
            AddressRole::Receiver => {
                self.receiver_addr_str = address.to_string();
                self.receiver_script_addr = pubkey.to_vec();
            }
            AddressRole::Refund => {
                self.refund_addr_str = address.to_string();
                self.refund_script_addr = decoded.hash.to_vec();
            }
            AddressRole::Redeem => {
                self.redeem_addr_str = address.to_string();
                self.redeem_script_addr = decoded.hash.to_vec();
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Contract{{ ")?;
        if !self.escrow_script.is_empty() {
            write!(f, "Escrow{{ ")?;
            if !self.sender_addr_str.is_empty() {
                write!(f, "from={} ", self.sender_addr_str)?;
            }
            if !self.receiver_addr_str.is_empty() {
                write!(f, "to={} ", self.receiver_addr_str)?;
            }
            if !self.escrow_hash.is_empty() {
                write!(f, "hash={} ", hex::encode(&self.escrow_hash))?;
            }
            if !self.escrow_addr_str.is_empty() {
                write!(f, "p2sh={} ", self.escrow_addr_str)?;
            }
            write!(f, "txlen={} scriptlen={} }} ", self.escrow_bytes.len(), self.escrow_script.len())?;
        }
        if !self.refund_addr_str.is_empty() {
            write!(f, "Refund{{ addr={} ", self.refund_addr_str)?;
            if !self.refund_hash.is_empty() {
                write!(f, "hash={} ", hex::encode(&self.refund_hash))?;
            }
            write!(f, "txlen={} }} ", self.refund_bytes.len())?;
        }
        if !self.redeem_addr_str.is_empty() {
            write!(f, "Redeem{{ addr={} ", self.redeem_addr_str)?;
            if !self.redeem_hash.is_empty() {
                write!(f, "hash={} ", hex::encode(&self.redeem_hash))?;
            }
            write!(f, "txlen={} }} ", self.redeem_bytes.len())?;
        }
        write!(f, "amount={} locktime={} }}", self.amount, self.lock_time)
    }
}

// =============================================================================
// Tests
// =============================================================================
