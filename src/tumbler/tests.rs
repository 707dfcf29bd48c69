// =============================================================================
// TUMBLEMIX v0.4 - Tumbler Protocol Tests
// =============================================================================
//
// Exercises both legs of the exchange end to end against a mock wallet:
// the puzzle-promise protocol from the payee's point of view, the
// puzzle-solver protocol from the payer's, and the glue between them.
// A solution revealed on the payer leg must unblind byte for byte to a
// secret promised on the payee leg.
//
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::contract::Address;
use crate::puzzle::{self, PuzzlePubKey};
use crate::shuffle;
use crate::tumbler::session::{FinalizeReason, PayeeState, PayerState, Session, State};
use crate::tumbler::{
    PaymentOffer, PuzzleDisclosure, SignatureChallenges, SolutionChallenges, TransactionDisclosure,
    Tumbler, TumblerConfig, TumblerError,
};
use crate::wallet::mock::MockWallet;
use crate::{MAINNET, UNIT_VALUE};

// Full-width keys make the suite crawl; 1024 bits exercises the same
// multi-prime CRT path (three primes).
const TEST_DIFFICULTY: usize = 1024;

const REAL_TX_COUNT: usize = crate::REAL_TRANSACTION_COUNT;
const FAKE_TX_COUNT: usize = crate::FAKE_TRANSACTION_COUNT;
const REAL_PZ_COUNT: usize = crate::REAL_PREIMAGE_COUNT;
const FAKE_PZ_COUNT: usize = crate::FAKE_PREIMAGE_COUNT;

fn test_config(difficulty: usize) -> TumblerConfig {
    TumblerConfig {
        chain_params: &MAINNET,
        puzzle_difficulty: difficulty,
        ..Default::default()
    }
}

fn new_tumbler(difficulty: usize) -> (Arc<Tumbler>, Arc<MockWallet>) {
    let wallet = Arc::new(MockWallet::new(&MAINNET, 1234));
    let tumbler = Tumbler::new(test_config(difficulty), wallet.clone());
    (tumbler, wallet)
}

fn shutdown_handle() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

struct TestSigner {
    secret: secp256k1::SecretKey,
    public: secp256k1::PublicKey,
}

impl TestSigner {
    fn new() -> TestSigner {
        let secret = secp256k1::SecretKey::new(&mut rand::thread_rng());
        let public = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &secret);
        TestSigner { secret, public }
    }

    fn pubkey(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }

    fn address(&self) -> String {
        Address::p2pkh_from_pubkey(&self.pubkey()).encode(&MAINNET)
    }

    fn sign(&self, hash: &[u8]) -> Vec<u8> {
        let msg = secp256k1::Message::from_slice(hash).expect("32-byte hash");
        secp256k1::SECP256K1
            .sign_ecdsa(&msg, &self.secret)
            .serialize_der()
            .to_vec()
    }

    fn verify(&self, sig: &[u8], hash: &[u8]) -> bool {
        let msg = secp256k1::Message::from_slice(hash).expect("32-byte hash");
        match secp256k1::ecdsa::Signature::from_der(sig) {
            Ok(sig) => secp256k1::SECP256K1
                .verify_ecdsa(&msg, &sig, &self.public)
                .is_ok(),
            Err(_) => false,
        }
    }
}

// =============================================================================
// Puzzle-Promise + Puzzle-Solver Round Trip
// =============================================================================

#[tokio::test]
async fn test_puzzle_promise_and_solver() {
    let (tb, _wallet) = new_tumbler(TEST_DIFFICULTY);

    tb.new_epoch(1234).expect("failed to set up an epoch");
    assert!(
        matches!(tb.new_epoch(1234), Err(TumblerError::BadBlockHeight(_))),
        "server allowed setting up the same epoch twice"
    );

    // Payee session, escrow phase bypassed: the wallet plumbing is
    // covered separately, the protocol needs only the epoch.
    let c1 = Session::new(&tb, "");
    c1.advance(State::Payee(PayeeState::EscrowComplete));
    let epoch = tb.current_epoch().expect("current epoch");
    c1.exchange.try_lock().unwrap().epoch = epoch;

    let (pkey, blinded, inverse) = run_puzzle_promise(&c1).await;

    // Payer session solving a blinded copy of the payee's first puzzle.
    let c2 = Session::new(&tb, "");
    let solution = run_puzzle_solving(&c2, &pkey, &blinded, epoch).await;

    let unblinded = puzzle::unblind_puzzle(&pkey, &solution, &inverse);
    let c1_exchange = c1.exchange.try_lock().unwrap();
    assert_eq!(
        c1_exchange.secrets[0], unblinded,
        "solver output doesn't unblind to the promised secret"
    );
}

/// Drives the payee leg: mixes real and fake challenge transactions,
/// obtains promises, discloses the fake set and verifies every proof the
/// tumbler returns. Returns the puzzle public key and a blinding of the
/// first puzzle.
async fn run_puzzle_promise(s: &Arc<Session>) -> (PuzzlePubKey, Vec<u8>, Vec<u8>) {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 32];
    rng.fill_bytes(&mut salt);

    let total = REAL_TX_COUNT + FAKE_TX_COUNT;
    let mut txh: Vec<Vec<u8>> = Vec::with_capacity(total);
    let mut real_tx_list: Vec<i32> = Vec::with_capacity(REAL_TX_COUNT);
    let mut fake_tx_list: Vec<i32> = Vec::with_capacity(FAKE_TX_COUNT);
    let mut random_pads: Vec<Vec<u8>> = Vec::with_capacity(FAKE_TX_COUNT);

    for i in 0..total {
        if i < REAL_TX_COUNT {
            txh.push(Sha256::digest([i as u8]).to_vec());
            real_tx_list.push(i as i32);
        } else {
            let mut pad = vec![0u8; 32];
            rng.fill_bytes(&mut pad);
            txh.push(puzzle::fake_tx_format(&pad));
            random_pads.push(pad);
            fake_tx_list.push(i as i32);
        }
    }

    // Mix the challenge set and rewrite both index lists.
    let sh = shuffle::shuffle(&mut rng, total, |i, j| txh.swap(i, j));
    for idx in fake_tx_list.iter_mut() {
        *idx = sh.get(*idx as usize) as i32;
    }
    for idx in real_tx_list.iter_mut() {
        *idx = sh.get(*idx as usize) as i32;
    }

    let fake_set_hash = puzzle::hash_index_list(&salt, &fake_tx_list).expect("hash fake set");
    let real_set_hash = puzzle::hash_index_list(&salt, &real_tx_list).expect("hash real set");

    let signer = TestSigner::new();
    let signatures: Vec<Vec<u8>> = txh.iter().map(|h| signer.sign(h)).collect();

    let promise = s
        .get_puzzle_promises(&SignatureChallenges {
            fake_set_hash,
            real_set_hash,
            transaction_hashes: txh.clone(),
            signatures,
            public_key: signer.pubkey(),
        })
        .await
        .expect("failed to acquire puzzle promises");

    let pkey = puzzle::parse_pub_key(&promise.puzzle_key).expect("failed to parse public key");

    let secrets = s
        .validate_puzzles(&TransactionDisclosure {
            fake_tx_list: puzzle::encode_index_list(&fake_tx_list).expect("encode fake"),
            real_tx_list: puzzle::encode_index_list(&real_tx_list).expect("encode real"),
            random_pads,
            salt: salt.to_vec(),
        })
        .await
        .expect("failed to acquire solutions to the fake set");
    assert_eq!(
        secrets.secrets.len(),
        fake_tx_list.len(),
        "obtained wrong amount of puzzle secrets"
    );

    // Every disclosed secret must open its promise to a valid signature.
    for (i, &j) in fake_tx_list.iter().enumerate() {
        let j = j as usize;
        assert!(
            puzzle::validate_puzzle(&pkey, &promise.puzzles[j], &secrets.secrets[i]),
            "obtained secrets didn't verify"
        );
        let sig = puzzle::reveal_solution(&promise.promises[j], &secrets.secrets[i])
            .expect("failed to recover signature");
        assert!(signer.verify(&sig, &txh[j]), "signature didn't verify");
    }

    // The quotient chain must link the puzzles of the real set.
    let real_puzzles: Vec<Vec<u8>> = real_tx_list
        .iter()
        .map(|&idx| promise.puzzles[idx as usize].clone())
        .collect();
    assert!(
        puzzle::verify_quotients(&pkey, &secrets.quotients, &real_puzzles),
        "failed to verify quotients"
    );

    // Hand back a blinding of the first puzzle.
    let (blinding, _, inverse) = puzzle::blind_puzzle(&pkey, &promise.puzzles[0]);
    (pkey, blinding, inverse)
}

/// Drives the payer leg: mixes fake puzzles with blinded copies of the
/// received puzzle, obtains solution promises, discloses the fake set and
/// extracts the solution. Returns the solution of the received puzzle.
async fn run_puzzle_solving(
    s: &Arc<Session>,
    pkey: &PuzzlePubKey,
    p: &[u8],
    epoch: i32,
) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let total = REAL_PZ_COUNT + FAKE_PZ_COUNT;

    let mut puzzles: Vec<Vec<u8>> = Vec::with_capacity(total);
    let mut real_factors: Vec<Vec<u8>> = Vec::with_capacity(REAL_PZ_COUNT);
    let mut real_inverses: Vec<Vec<u8>> = Vec::with_capacity(REAL_PZ_COUNT);
    let mut real_pz_list: Vec<i32> = Vec::with_capacity(REAL_PZ_COUNT);
    let mut fake_factors: Vec<Vec<u8>> = Vec::with_capacity(FAKE_PZ_COUNT);
    let mut fake_pz_list: Vec<i32> = Vec::with_capacity(FAKE_PZ_COUNT);

    // Blinding multiplies by a random factor, so blinding the unit
    // produces a puzzle whose solution is the factor itself.
    let one = [1u8];
    for i in 0..total {
        if i < FAKE_PZ_COUNT {
            let (z, factor, _) = puzzle::blind_puzzle(pkey, &one);
            puzzles.push(z);
            fake_factors.push(factor);
            fake_pz_list.push(i as i32);
        } else {
            let (z, factor, inverse) = puzzle::blind_puzzle(pkey, p);
            puzzles.push(z);
            real_factors.push(factor);
            real_inverses.push(inverse);
            real_pz_list.push(i as i32);
        }
    }

    let sh = shuffle::shuffle(&mut rng, total, |i, j| puzzles.swap(i, j));
    for idx in fake_pz_list.iter_mut() {
        *idx = sh.get(*idx as usize) as i32;
    }
    for idx in real_pz_list.iter_mut() {
        *idx = sh.get(*idx as usize) as i32;
    }

    let promise = s
        .get_solution_promises(&SolutionChallenges {
            address: String::new(),
            epoch,
            puzzles: puzzles.clone(),
        })
        .await
        .expect("failed to acquire solution promises");
    assert_eq!(promise.cookie, s.cookie());

    // Disclose the fake set and exchange it for the matching keys.
    let secrets = s
        .validate_solutions(&PuzzleDisclosure {
            fake_puzzle_list: puzzle::encode_index_list(&fake_pz_list).expect("encode fakes"),
            fake_factors: fake_factors.clone(),
        })
        .await
        .expect("failed to validate solutions");
    assert_eq!(
        secrets.secrets.len(),
        fake_pz_list.len(),
        "obtained wrong amount of solution secrets"
    );

    for (i, &idx) in fake_pz_list.iter().enumerate() {
        let idx = idx as usize;
        assert_eq!(
            puzzle::key_hash(&secrets.secrets[i]),
            promise.key_hashes[idx],
            "secret hash didn't verify"
        );
        let solution = puzzle::reveal_solution(&promise.promises[idx], &secrets.secrets[i])
            .expect("failed to open a solution promise");
        assert_eq!(solution, fake_factors[i], "solution didn't verify");
    }

    // Disclose blinding factors for the real set and collect the keys the
    // fulfilling transaction would publish.
    s.exchange.try_lock().unwrap().real_puzzle_list =
        real_pz_list.iter().map(|&i| i as usize).collect();

    let solutions = s
        .reveal_solution(&PaymentOffer {
            amount: UNIT_VALUE,
            public_key: Vec::new(),
            escrow_hash: Vec::new(),
            escrow_script: Vec::new(),
            escrow_tx: Vec::new(),
            puzzle: p.to_vec(),
            real_puzzle_list: puzzle::encode_index_list(&real_pz_list).expect("encode reals"),
            real_factors: real_factors.clone(),
        })
        .expect("failed to reveal solutions");
    assert_eq!(
        solutions.len(),
        real_pz_list.len(),
        "obtained wrong amount of solution secrets"
    );

    let mut puzzle_solutions: Vec<Vec<u8>> = Vec::with_capacity(real_pz_list.len());
    for (i, &idx) in real_pz_list.iter().enumerate() {
        let idx = idx as usize;
        assert_eq!(
            puzzle::key_hash(&solutions[i]),
            promise.key_hashes[idx],
            "secret hash didn't verify"
        );
        let solution = puzzle::reveal_solution(&promise.promises[idx], &solutions[i])
            .expect("failed to open a solution promise");
        assert!(
            puzzle::validate_puzzle(pkey, &puzzles[idx], &solution),
            "solution didn't verify"
        );
        puzzle_solutions.push(puzzle::unblind_puzzle(pkey, &solution, &real_inverses[i]));
    }
    for pair in puzzle_solutions.windows(2) {
        assert_eq!(pair[0], pair[1], "puzzle solutions aren't unique");
    }

    // The blinded solutions the session recorded are exactly what the
    // promises open to.
    let ex = s.exchange.try_lock().unwrap();
    for (i, &idx) in real_pz_list.iter().enumerate() {
        let idx = idx as usize;
        let opened =
            puzzle::reveal_solution(&promise.promises[idx], &solutions[i]).expect("open");
        assert_eq!(ex.solutions[idx], opened);
    }
    drop(ex);

    puzzle_solutions[0].clone()
}

// =============================================================================
// Escrow Setup
// =============================================================================

#[tokio::test]
async fn test_setup_and_finalize_escrow() {
    let (tb, _wallet) = new_tumbler(512);
    tb.new_epoch(1234).expect("epoch");

    let client = TestSigner::new();
    let s = Session::new(&tb, &client.address());

    let offer = s
        .setup_escrow(&crate::tumbler::EscrowRequest {
            address: client.address(),
            public_key: client.pubkey(),
            amount: UNIT_VALUE,
        })
        .await
        .expect("setup escrow");

    assert_eq!(s.state(), State::Payee(PayeeState::EscrowComplete));
    assert_eq!(offer.epoch, 1234);
    assert_eq!(offer.lock_time, 1234 + tb.config().epoch_duration);
    assert!(!offer.escrow_script.is_empty());

    // The escrow transaction pays the unit amount into the P2SH output.
    let escrow = crate::contract::Transaction::deserialize(&offer.escrow_tx).expect("escrow tx");
    let pay_script = crate::contract::script::pay_to_script_hash(&offer.escrow_script);
    let escrowed = escrow
        .outputs
        .iter()
        .find(|o| o.pk_script == pay_script)
        .expect("escrow output");
    assert_eq!(escrowed.value, UNIT_VALUE);

    // A non-unit amount is rejected before any wallet work happens.
    let s2 = Session::new(&tb, &client.address());
    let err = s2
        .setup_escrow(&crate::tumbler::EscrowRequest {
            address: client.address(),
            public_key: client.pubkey(),
            amount: UNIT_VALUE * 2,
        })
        .await;
    assert!(matches!(err, Err(TumblerError::Contract(_))));
    assert_eq!(s2.state(), State::Initial);

    // Skip the puzzle rounds and publish: the session finishes cleanly.
    s.advance(State::Payee(PayeeState::PuzzlesValidated));
    let escrow_hash = s.finalize_escrow().await.expect("finalize escrow");
    assert!(!escrow_hash.is_empty());
    assert_eq!(s.state(), State::Payee(PayeeState::EscrowPublished));
    assert!(s.is_finalized());
    assert!(tb.lookup(&s.cookie()).is_none());
}

// =============================================================================
// Cut-and-Choose Negative Paths
// =============================================================================

#[tokio::test]
async fn test_commitment_mismatch_is_rejected() {
    let (tb, _wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");

    let s = Session::new(&tb, "");
    s.advance(State::Payee(PayeeState::EscrowComplete));
    s.exchange.try_lock().unwrap().epoch = 100;

    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 32];
    rng.fill_bytes(&mut salt);

    let mut pad = vec![0u8; 32];
    rng.fill_bytes(&mut pad);
    let txh = vec![Sha256::digest([1u8]).to_vec(), puzzle::fake_tx_format(&pad)];
    let real_list = [0i32];
    let fake_list = [1i32];

    let signer = TestSigner::new();
    let challenges = SignatureChallenges {
        fake_set_hash: puzzle::hash_index_list(&salt, &fake_list).unwrap(),
        real_set_hash: puzzle::hash_index_list(&salt, &real_list).unwrap(),
        transaction_hashes: txh.clone(),
        signatures: txh.iter().map(|h| signer.sign(h)).collect(),
        public_key: signer.pubkey(),
    };
    s.get_puzzle_promises(&challenges).await.expect("promises");

    // Declare a fake set that doesn't match the committed hash.
    let err = s
        .validate_puzzles(&TransactionDisclosure {
            fake_tx_list: puzzle::encode_index_list(&[0]).unwrap(),
            real_tx_list: puzzle::encode_index_list(&real_list).unwrap(),
            random_pads: vec![pad.clone()],
            salt: salt.to_vec(),
        })
        .await;
    assert!(matches!(err, Err(TumblerError::FakeSetMismatch)));

    // A correct disclosure still goes through afterwards: failed
    // validation leaves the state untouched.
    s.validate_puzzles(&TransactionDisclosure {
        fake_tx_list: puzzle::encode_index_list(&fake_list).unwrap(),
        real_tx_list: puzzle::encode_index_list(&real_list).unwrap(),
        random_pads: vec![pad],
        salt: salt.to_vec(),
    })
    .await
    .expect("valid disclosure");
}

#[tokio::test]
async fn test_cheating_client_fake_puzzle_rejected() {
    let (tb, _wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");
    let pk = tb.puzzle_key(100).expect("key").public_key();

    let s = Session::new(&tb, "");

    // One genuinely fake puzzle and one that hides a real payload.
    let (fake, fake_factor, _) = puzzle::blind_puzzle(&pk, &[1u8]);
    let (real, real_factor, _) = puzzle::blind_puzzle(&pk, &[7u8; 16]);

    s.get_solution_promises(&SolutionChallenges {
        address: String::new(),
        epoch: 100,
        puzzles: vec![fake, real],
    })
    .await
    .expect("promises");

    // Declaring the hidden-payload puzzle as fake must fail.
    let err = s
        .validate_solutions(&PuzzleDisclosure {
            fake_puzzle_list: puzzle::encode_index_list(&[0, 1]).unwrap(),
            fake_factors: vec![fake_factor.clone(), real_factor],
        })
        .await;
    assert!(matches!(err, Err(TumblerError::PuzzleVerification)));

    // The honest subset still verifies.
    s.validate_solutions(&PuzzleDisclosure {
        fake_puzzle_list: puzzle::encode_index_list(&[0]).unwrap(),
        fake_factors: vec![fake_factor],
    })
    .await
    .expect("honest disclosure");
}

// =============================================================================
// State Machine
// =============================================================================

#[tokio::test]
async fn test_state_machine_rejects_out_of_order() {
    let (tb, _wallet) = new_tumbler(512);
    let s = Session::new(&tb, "");

    // From the initial state only the two entry operations are ready.
    let err = s
        .validate_puzzles(&TransactionDisclosure {
            fake_tx_list: Vec::new(),
            real_tx_list: Vec::new(),
            random_pads: Vec::new(),
            salt: vec![0u8; 32],
        })
        .await;
    assert!(matches!(err, Err(TumblerError::NotReady { .. })));

    let err = s
        .validate_solutions(&PuzzleDisclosure {
            fake_puzzle_list: Vec::new(),
            fake_factors: Vec::new(),
        })
        .await;
    assert!(matches!(err, Err(TumblerError::NotReady { .. })));

    // Terminal states refuse every transition.
    s.advance(State::Payee(PayeeState::EscrowPublished));
    let err = s
        .get_puzzle_promises(&SignatureChallenges {
            fake_set_hash: Vec::new(),
            real_set_hash: Vec::new(),
            transaction_hashes: Vec::new(),
            signatures: Vec::new(),
            public_key: Vec::new(),
        })
        .await;
    assert!(matches!(err, Err(TumblerError::PastFinalStage(_))));

    let err = s.finalize_escrow().await;
    assert!(matches!(err, Err(TumblerError::PastFinalStage(_))));
}

#[test]
#[should_panic(expected = "no reason for success")]
fn test_success_finalization_requires_terminal_state() {
    let (tb, _wallet) = new_tumbler(512);
    let s = Session::new(&tb, "");
    s.finalize_exchange(FinalizeReason::Success, None);
}

// =============================================================================
// Expiration & Finalization
// =============================================================================

#[tokio::test]
async fn test_expiration_finalizes_exactly_once() {
    let (tb, _wallet) = new_tumbler(512);
    let (_tx, shutdown) = shutdown_handle();

    let s = Session::new(&tb, "client");
    assert_eq!(tb.session_count(), 1);
    *s.expire.lock().unwrap() = Instant::now() - Duration::from_secs(1);

    tb.tick(Instant::now(), &shutdown).await;
    assert!(s.is_finalized());
    assert_eq!(tb.session_count(), 0);
    assert_eq!(tb.scheduler.pending_count(), 0);
    assert!(tb.lookup(&s.cookie()).is_none());

    // A second tick and a racing failure-path finalization are no-ops.
    tb.tick(Instant::now(), &shutdown).await;
    s.finalize_exchange(FinalizeReason::FailedExchange, None);
    assert_eq!(tb.session_count(), 0);
}

#[tokio::test]
async fn test_cookie_uniqueness() {
    let (tb, _wallet) = new_tumbler(512);
    let mut cookies = std::collections::HashSet::new();
    let mut sessions = Vec::new();
    for _ in 0..64 {
        let s = Session::new(&tb, "");
        assert!(cookies.insert(s.cookie()), "cookie issued twice");
        sessions.push(s);
    }
    assert_eq!(tb.session_count(), 64);

    for s in &sessions {
        let found = tb.lookup(&s.cookie()).expect("lookup");
        assert!(Arc::ptr_eq(&found, s));
    }
}

// =============================================================================
// Offer Confirmation Loop
// =============================================================================

/// Sets up a payer session holding solution promises for two blinded
/// copies of a base puzzle, ready for a payment offer.
async fn offer_session(
    tb: &Arc<Tumbler>,
    signer: &TestSigner,
) -> (Arc<Session>, PaymentOffer, Vec<Vec<u8>>) {
    let key = tb.puzzle_key(100).expect("key");
    let pk = key.public_key();
    let (base, _, _) = puzzle::new_puzzle_promise(&key, b"cash-out signature").expect("puzzle");

    let (z0, f0, _) = puzzle::blind_puzzle(&pk, &base);
    let (z1, f1, _) = puzzle::blind_puzzle(&pk, &base);

    let s = Session::new(tb, &signer.address());
    let promises = s
        .get_solution_promises(&SolutionChallenges {
            address: signer.address(),
            epoch: 100,
            puzzles: vec![z0, z1],
        })
        .await
        .expect("promises");

    // No fakes disclosed; the client trusts the tumbler in this test.
    s.validate_solutions(&PuzzleDisclosure {
        fake_puzzle_list: Vec::new(),
        fake_factors: Vec::new(),
    })
    .await
    .expect("validate");

    let offer = PaymentOffer {
        amount: UNIT_VALUE,
        public_key: signer.pubkey(),
        escrow_hash: vec![0xEE; 32],
        escrow_script: vec![0x51],
        escrow_tx: vec![0x01, 0x02, 0x03],
        puzzle: base,
        real_puzzle_list: puzzle::encode_index_list(&[0, 1]).unwrap(),
        real_factors: vec![f0, f1],
    };
    (s, offer, promises.key_hashes)
}

#[tokio::test]
async fn test_offer_confirmation_loop() {
    let (tb, wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");
    let (_tx, shutdown) = shutdown_handle();

    let signer = TestSigner::new();
    let (s, offer, key_hashes) = offer_session(&tb, &signer).await;

    // Unconfirmed twice, then confirmed.
    wallet.confirm_after(2);
    s.payment_offer(offer).await.expect("payment offer");
    assert_eq!(s.state(), State::Payer(PayerState::OfferReceived));
    assert_eq!(wallet.offer_checks(), 1);
    assert_eq!(tb.scheduler.action_count(), 1);

    // First poll: still unconfirmed, rescheduled.
    tb.tick(Instant::now() + Duration::from_secs(6 * 60), &shutdown)
        .await;
    assert_eq!(wallet.offer_checks(), 2);
    assert_eq!(tb.scheduler.action_count(), 1);
    assert_eq!(s.state(), State::Payer(PayerState::OfferReceived));

    // Second poll: confirmed, the solution goes out on chain.
    tb.tick(Instant::now() + Duration::from_secs(12 * 60), &shutdown)
        .await;
    assert_eq!(wallet.offer_checks(), 3);
    assert_eq!(s.state(), State::Payer(PayerState::SolutionPublished));
    assert!(s.is_finalized());
    assert!(tb.lookup(&s.cookie()).is_none());

    // The published preimages are exactly the promised keys.
    let published = wallet.published_secrets.lock().unwrap().clone();
    assert_eq!(published.len(), 2);
    for (secret, expected) in published.iter().zip(&key_hashes) {
        assert_eq!(&puzzle::key_hash(secret), expected);
    }
}

#[tokio::test]
async fn test_offer_confirmation_deadline() {
    let (tb, wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");
    let (_tx, shutdown) = shutdown_handle();

    let signer = TestSigner::new();
    let (s, offer, _) = offer_session(&tb, &signer).await;

    // Never confirms.
    wallet.confirm_after(u32::MAX);
    s.payment_offer(offer).await.expect("payment offer");
    assert_eq!(tb.scheduler.action_count(), 1);

    // Pretend the three-interval window has already elapsed.
    s.exchange.try_lock().unwrap().deadline = Some(Instant::now() - Duration::from_secs(1));

    tb.tick(Instant::now() + Duration::from_secs(6 * 60), &shutdown)
        .await;
    assert!(s.is_finalized());
    assert_eq!(s.state(), State::Payer(PayerState::OfferReceived));
    assert!(matches!(
        s.async_err(),
        Some(TumblerError::OfferNotConfirmed(_))
    ));
    assert!(tb.lookup(&s.cookie()).is_none());
}

#[tokio::test]
async fn test_offer_after_completion_rejected() {
    let (tb, wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");

    let signer = TestSigner::new();
    let (s, offer, _) = offer_session(&tb, &signer).await;

    wallet.confirm_after(0);
    s.payment_offer(offer.clone()).await.expect("payment offer");
    assert_eq!(s.state(), State::Payer(PayerState::SolutionPublished));

    // The session is finalized; a second offer can't advance anything.
    let err = s.payment_offer(offer).await;
    assert!(matches!(err, Err(TumblerError::PastFinalStage(_))));
}

// =============================================================================
// Epochs
// =============================================================================

#[tokio::test]
async fn test_epoch_lifecycle() {
    let (tb, _wallet) = new_tumbler(512);

    tb.new_epoch(100).expect("first epoch");
    assert!(matches!(
        tb.new_epoch(100),
        Err(TumblerError::BadBlockHeight(100))
    ));
    assert!(matches!(
        tb.new_epoch(99),
        Err(TumblerError::BadBlockHeight(99))
    ));

    tb.new_epoch(105).expect("second epoch");
    assert_eq!(tb.epoch_count(), 2);
    assert_eq!(tb.current_epoch().expect("current"), 105);

    // 100 + EPOCH_DURATION < 112 evicts the first epoch only.
    tb.new_epoch(112).expect("third epoch");
    assert_eq!(tb.epoch_count(), 2);
    assert!(matches!(
        tb.puzzle_key(100),
        Err(TumblerError::EpochNotFound)
    ));

    // In-flight sessions still reach a live epoch's key by height.
    assert!(tb.puzzle_key(105).is_ok());
    assert!(tb.puzzle_key(112).is_ok());
    assert_eq!(tb.current_epoch().expect("current"), 112);
}

#[tokio::test]
async fn test_epoch_address_allocated_once() {
    let (tb, _wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");

    let (addr1, pubkey1) = tb.epoch_address(100).await.expect("allocate");
    let (addr2, pubkey2) = tb.epoch_address(100).await.expect("cached");
    assert_eq!(addr1, addr2);
    assert_eq!(pubkey1, pubkey2);

    assert!(matches!(
        tb.epoch_address(42).await,
        Err(TumblerError::EpochNotFound)
    ));
}

#[tokio::test]
async fn test_epoch_address_refused_near_expiry() {
    use std::sync::atomic::Ordering;

    let (tb, _wallet) = new_tumbler(512);
    tb.new_epoch(100).expect("epoch");

    // Make the epoch look ancient relative to the published height.
    tb.last_epoch.store(150, Ordering::SeqCst);
    assert!(matches!(
        tb.epoch_address(100).await,
        Err(TumblerError::EpochTooOld(100))
    ));
}
