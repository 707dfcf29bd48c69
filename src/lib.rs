// =============================================================================
// TUMBLEMIX v0.4 - Protocol Constants & Network Parameters
// Unlinkable payments: RSA puzzle promises over hash-locked escrow contracts
// =============================================================================

pub mod contract;
pub mod puzzle;
pub mod rpc;
pub mod shuffle;
pub mod tumbler;
pub mod wallet;

use std::time::Duration;

// --- Timing parameters ---

/// Assumed wall-clock period between two blocks. Deadlines for deferred
/// work and session expiration are expressed in multiples of it.
pub const CONFIRMATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Number of confirmations before a client transaction is trusted.
pub const CONFIRMATION_THRESHOLD: u32 = 2;

// --- Epoch parameters ---

/// Duration of a single epoch in blocks, i.e. the window within which the
/// Escrow, Payment and Cash-Out phases of an exchange take place. It also
/// bounds how long tumbler funds stay escrowed before the refund path
/// becomes spendable.
pub const EPOCH_DURATION: i32 = 10;

/// Interval between two consecutive epochs, in blocks.
pub const EPOCH_RENEWAL: i32 = EPOCH_DURATION / 2;

/// Modulus size of the tumbler's RSA puzzle group, in bits.
pub const PUZZLE_DIFFICULTY: usize = 2048;

// --- Cut-and-choose parameters ---

/// Number of real transactions a payee mixes into the challenge set.
/// Together with the fake count this gives roughly one in 2^(42+42)
/// odds of the tumbler cheating the puzzle-promise protocol undetected.
pub const REAL_TRANSACTION_COUNT: usize = 42;

/// Number of fake transactions mixed into the challenge set. Shouldn't
/// be less than REAL_TRANSACTION_COUNT.
pub const FAKE_TRANSACTION_COUNT: usize = REAL_TRANSACTION_COUNT;

/// Number of hash preimages the payer puts into the offer transaction.
/// NOTE: when changing this value the redeem script size estimate passed
/// to Contract::build_redeem_tx has to be updated as well.
pub const REAL_PREIMAGE_COUNT: usize = 15;

/// Number of fake puzzles used to test the tumbler's fairness during the
/// puzzle-solver protocol.
pub const FAKE_PREIMAGE_COUNT: usize = 285;

// --- Economic parameters ---

/// The single denomination moved by every exchange, in atomic units.
/// All contract amounts are pinned to this value until arbitrary
/// denominations are supported.
pub const UNIT_VALUE: i64 = 100_000_000;

// =============================================================================
// Network Parameters
// =============================================================================

/// Address encoding parameters for a particular network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub name: &'static str,
    /// Version byte for pay-to-pubkey-hash addresses.
    pub p2pkh_version: u8,
    /// Version byte for pay-to-script-hash addresses.
    pub p2sh_version: u8,
}

pub const MAINNET: ChainParams = ChainParams {
    name: "mainnet",
    p2pkh_version: 0x00,
    p2sh_version: 0x05,
};

pub const TESTNET: ChainParams = ChainParams {
    name: "testnet",
    p2pkh_version: 0x6f,
    p2sh_version: 0xc4,
};

pub const SIMNET: ChainParams = ChainParams {
    name: "simnet",
    p2pkh_version: 0x3f,
    p2sh_version: 0x7b,
};

// --- Utilities ---

pub fn format_units(atoms: i64) -> String {
    let whole = atoms / UNIT_VALUE;
    let frac = (atoms % UNIT_VALUE).abs();
    if frac == 0 {
        format!("{}", whole)
    } else {
        format!("{}.{:08}", whole, frac)
    }
}
