// =============================================================================
// TUMBLEMIX v0.4 - Contract Scripts: Engine
// =============================================================================
//
// Stack-based virtual machine for the contract script dialect. Refund and
// redeem transactions are simulated here before being handed to the wallet
// for publication, with the same verification flags the network applies.
//
// =============================================================================

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::contract::opcodes::Opcode;

// =============================================================================
// Verification Flags
// =============================================================================

/// Evaluate pay-to-script-hash outputs by running the deposited script.
pub const VERIFY_BIP16: u32 = 1 << 0;
/// Signatures must parse as strict DER.
pub const VERIFY_DER_SIGNATURES: u32 = 1 << 1;
/// Signature hash types and public keys must be well-formed.
pub const VERIFY_STRICT_ENCODING: u32 = 1 << 2;
/// Data pushes must use the smallest possible encoding.
pub const VERIFY_MINIMAL_DATA: u32 = 1 << 3;
/// Upgradable NOPs fail script execution.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 4;
/// Exactly one element must remain after execution.
pub const VERIFY_CLEAN_STACK: u32 = 1 << 5;
/// Enforce OP_CHECKLOCKTIMEVERIFY.
pub const VERIFY_CHECK_LOCKTIME: u32 = 1 << 6;
/// Enforce OP_CHECKSEQUENCEVERIFY.
pub const VERIFY_CHECK_SEQUENCE: u32 = 1 << 7;
/// Signature S values must be in the lower half of the curve order.
pub const VERIFY_LOW_S: u32 = 1 << 8;
/// Allow OP_SHA256.
pub const VERIFY_SHA256: u32 = 1 << 9;

/// Flag set applied to every locally simulated contract transaction.
pub const STANDARD_VERIFY_FLAGS: u32 = VERIFY_BIP16
    | VERIFY_DER_SIGNATURES
    | VERIFY_STRICT_ENCODING
    | VERIFY_MINIMAL_DATA
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEAN_STACK
    | VERIFY_CHECK_LOCKTIME
    | VERIFY_CHECK_SEQUENCE
    | VERIFY_LOW_S
    | VERIFY_SHA256;

// =============================================================================
// Configuration
// =============================================================================

/// Execution limits.
#[derive(Clone, Debug)]
pub struct ScriptConfig {
    pub max_script_size: usize,
    pub max_stack_size: usize,
    pub max_element_size: usize,
    pub max_ops_count: usize,
    pub max_pubkeys_per_multisig: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig {
            max_script_size: 10_000,
            max_stack_size: 1_000,
            max_element_size: 2_048,
            max_ops_count: 255,
            max_pubkeys_per_multisig: 20,
        }
    }
}

// =============================================================================
// Script Error
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptError {
    ScriptTooLarge,
    StackOverflow,
    StackUnderflow,
    ElementTooLarge,
    TooManyOps,
    InvalidOpcode(u8),
    VerifyFailed,
    EvalFalse,
    OpReturn,
    UnbalancedConditional,
    InvalidNumber,
    NonMinimalPush,
    InvalidPubKey,
    InvalidSignature,
    MultisigFailed,
    TooManyPubKeys,
    InvalidMultisig,
    LocktimeNotSatisfied,
    SequenceNotSatisfied,
    NegativeLocktime,
    DiscouragedNop,
    DisabledOpcode(u8),
    CleanStack,
    SigPushOnly,
    TruncatedPush,
    NoSigChecker,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::ScriptTooLarge => write!(f, "script exceeds maximum size"),
            ScriptError::StackOverflow => write!(f, "stack overflow"),
            ScriptError::StackUnderflow => write!(f, "stack underflow"),
            ScriptError::ElementTooLarge => write!(f, "element exceeds maximum size"),
            ScriptError::TooManyOps => write!(f, "too many operations"),
            ScriptError::InvalidOpcode(b) => write!(f, "invalid opcode: 0x{:02X}", b),
            ScriptError::VerifyFailed => write!(f, "verification failed"),
            ScriptError::EvalFalse => write!(f, "script evaluated to false"),
            ScriptError::OpReturn => write!(f, "OP_RETURN executed"),
            ScriptError::UnbalancedConditional => write!(f, "unbalanced IF/ELSE/ENDIF"),
            ScriptError::InvalidNumber => write!(f, "invalid number encoding"),
            ScriptError::NonMinimalPush => write!(f, "non-minimal push encoding"),
            ScriptError::InvalidPubKey => write!(f, "invalid public key"),
            ScriptError::InvalidSignature => write!(f, "invalid signature"),
            ScriptError::MultisigFailed => write!(f, "multisig verification failed"),
            ScriptError::TooManyPubKeys => write!(f, "too many public keys"),
            ScriptError::InvalidMultisig => write!(f, "invalid multisig format"),
            ScriptError::LocktimeNotSatisfied => write!(f, "locktime not satisfied"),
            ScriptError::SequenceNotSatisfied => write!(f, "sequence not satisfied"),
            ScriptError::NegativeLocktime => write!(f, "negative locktime"),
            ScriptError::DiscouragedNop => write!(f, "discouraged upgradable NOP"),
            ScriptError::DisabledOpcode(b) => write!(f, "disabled opcode: 0x{:02X}", b),
            ScriptError::CleanStack => write!(f, "stack not clean after execution"),
            ScriptError::SigPushOnly => write!(f, "signature script is not push only"),
            ScriptError::TruncatedPush => write!(f, "push extends past end of script"),
            ScriptError::NoSigChecker => write!(f, "no signature checker installed"),
        }
    }
}

impl std::error::Error for ScriptError {}

// =============================================================================
// Execution Context
// =============================================================================

/// Signature verification function: (pubkey, DER signature, message).
pub type SigChecker = fn(&[u8], &[u8], &[u8]) -> bool;

/// Transaction data visible to the script being executed.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    /// Signature hash the spending transaction commits to.
    pub sig_hash: Vec<u8>,
    /// Lock time of the spending transaction.
    pub lock_time: u32,
    /// Sequence of the spending input.
    pub sequence: u32,
    pub sig_checker: Option<SigChecker>,
}

/// DER signature check against secp256k1.
pub fn secp_sig_checker(pubkey: &[u8], sig: &[u8], msg: &[u8]) -> bool {
    let Ok(pubkey) = secp256k1::PublicKey::from_slice(pubkey) else {
        return false;
    };
    let Ok(sig) = secp256k1::ecdsa::Signature::from_der(sig) else {
        return false;
    };
    let Ok(msg) = secp256k1::Message::from_slice(msg) else {
        return false;
    };
    secp256k1::SECP256K1.verify_ecdsa(&msg, &sig, &pubkey).is_ok()
}

// =============================================================================
// Tokenizer
// =============================================================================

enum Token {
    Push(Vec<u8>),
    Op(Opcode),
}

/// Reads one token starting at `pos`, returning the token and the offset
/// just past it.
fn next_token(script: &[u8], pos: usize) -> Result<(Token, usize), ScriptError> {
    let byte = script[pos];
    match byte {
        0x00 => Ok((Token::Push(Vec::new()), pos + 1)),
        0x01..=0x4B => {
            let len = byte as usize;
            let start = pos + 1;
            if start + len > script.len() {
                return Err(ScriptError::TruncatedPush);
            }
            Ok((Token::Push(script[start..start + len].to_vec()), start + len))
        }
        0x4C | 0x4D | 0x4E => {
            let width = match byte {
                0x4C => 1,
                0x4D => 2,
                _ => 4,
            };
            if pos + 1 + width > script.len() {
                return Err(ScriptError::TruncatedPush);
            }
            let mut len = 0usize;
            for (i, b) in script[pos + 1..pos + 1 + width].iter().enumerate() {
                len |= (*b as usize) << (8 * i);
            }
            let start = pos + 1 + width;
            if start + len > script.len() {
                return Err(ScriptError::TruncatedPush);
            }
            Ok((Token::Push(script[start..start + len].to_vec()), start + len))
        }
        0x4F => Ok((Token::Push(vec![0x81]), pos + 1)),
        0x51..=0x60 => Ok((Token::Push(vec![byte - 0x50]), pos + 1)),
        _ => match Opcode::from_byte(byte) {
            Some(op) => Ok((Token::Op(op), pos + 1)),
            None => Err(ScriptError::InvalidOpcode(byte)),
        },
    }
}

/// Checks that a direct push used the smallest possible encoding.
fn check_minimal_push(script: &[u8], pos: usize, data: &[u8]) -> Result<(), ScriptError> {
    let opcode = script[pos];
    let minimal = match data.len() {
        0 => opcode == 0x00,
        1 if data[0] >= 1 && data[0] <= 16 => opcode == 0x50 + data[0],
        1 if data[0] == 0x81 => opcode == 0x4F,
        l if l <= 75 => opcode as usize == l,
        l if l <= 255 => opcode == 0x4C,
        l if l <= 65535 => opcode == 0x4D,
        _ => true,
    };
    if minimal {
        Ok(())
    } else {
        Err(ScriptError::NonMinimalPush)
    }
}

/// Extracts every data push from a push-only script. Used to pull hash
/// preimages back out of a published redeem signature script.
pub fn pushed_data(script: &[u8]) -> Result<Vec<Vec<u8>>, ScriptError> {
    let mut pos = 0;
    let mut pushes = Vec::new();
    while pos < script.len() {
        match next_token(script, pos)? {
            (Token::Push(data), next) => {
                pushes.push(data);
                pos = next;
            }
            (Token::Op(_), next) => pos = next,
        }
    }
    Ok(pushes)
}

fn is_push_only(script: &[u8]) -> Result<bool, ScriptError> {
    let mut pos = 0;
    while pos < script.len() {
        match next_token(script, pos)? {
            (Token::Push(_), next) => pos = next,
            (Token::Op(_), _) => return Ok(false),
        }
    }
    Ok(true)
}

/// Recognizes the canonical P2SH output pattern.
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23
        && script[0] == Opcode::OP_HASH160.to_byte()
        && script[1] == 0x14
        && script[22] == Opcode::OP_EQUAL.to_byte()
}

// =============================================================================
// Script Numbers
// =============================================================================

/// Parses a little-endian sign-magnitude script number of at most
/// `max_len` bytes.
fn script_num(data: &[u8], require_minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
    if data.len() > max_len {
        return Err(ScriptError::InvalidNumber);
    }
    if data.is_empty() {
        return Ok(0);
    }
    if require_minimal {
        let last = data[data.len() - 1];
        if last & 0x7F == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
            return Err(ScriptError::InvalidNumber);
        }
    }
    let mut result: i64 = 0;
    for (i, b) in data.iter().enumerate() {
        if i == data.len() - 1 {
            result |= ((b & 0x7F) as i64) << (8 * i);
            if b & 0x80 != 0 {
                result = -result;
            }
        } else {
            result |= (*b as i64) << (8 * i);
        }
    }
    Ok(result)
}

/// Encodes a number in little-endian sign-magnitude form.
pub fn encode_script_num(num: i64) -> Vec<u8> {
    if num == 0 {
        return Vec::new();
    }
    let negative = num < 0;
    let mut abs = num.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xFF) as u8);
        abs >>= 8;
    }
    if result[result.len() - 1] & 0x80 != 0 {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = result.len() - 1;
        result[last] |= 0x80;
    }
    result
}

fn as_bool(data: &[u8]) -> bool {
    for (i, b) in data.iter().enumerate() {
        if *b != 0 {
            // Negative zero counts as false.
            return !(i == data.len() - 1 && *b == 0x80);
        }
    }
    false
}

// =============================================================================
// Script Engine
// =============================================================================

pub struct ScriptEngine {
    config: ScriptConfig,
    flags: u32,
    context: ExecutionContext,
    stack: Vec<Vec<u8>>,
}

impl ScriptEngine {
    pub fn new(flags: u32) -> Self {
        ScriptEngine {
            config: ScriptConfig::default(),
            flags,
            context: ExecutionContext::default(),
            stack: Vec::new(),
        }
    }

    pub fn set_context(&mut self, context: ExecutionContext) {
        self.context = context;
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > self.config.max_element_size {
            return Err(ScriptError::ElementTooLarge);
        }
        if self.stack.len() >= self.config.max_stack_size {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(data);
        Ok(())
    }

    /// Executes a script against the current stack.
    pub fn run(&mut self, script: &[u8]) -> Result<(), ScriptError> {
        if script.len() > self.config.max_script_size {
            return Err(ScriptError::ScriptTooLarge);
        }

        let mut pos = 0;
        let mut op_count = 0;
        let mut cond_stack: Vec<bool> = Vec::new();

        while pos < script.len() {
            let executing = cond_stack.iter().all(|c| *c);
            let start = pos;
            let (token, next) = next_token(script, pos)?;
            pos = next;

            match token {
                Token::Push(data) => {
                    if !executing {
                        continue;
                    }
                    if self.has_flag(VERIFY_MINIMAL_DATA) {
                        check_minimal_push(script, start, &data)?;
                    }
                    self.push(data)?;
                }
                Token::Op(op) => {
                    op_count += 1;
                    if op_count > self.config.max_ops_count {
                        return Err(ScriptError::TooManyOps);
                    }
                    self.execute_op(op, executing, &mut cond_stack)?;
                }
            }
        }

        if !cond_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn execute_op(
        &mut self,
        op: Opcode,
        executing: bool,
        cond_stack: &mut Vec<bool>,
    ) -> Result<(), ScriptError> {
        // Flow control runs even inside a skipped branch.
        match op {
            Opcode::OP_IF | Opcode::OP_NOTIF => {
                let mut cond = false;
                if executing {
                    let top = self.pop()?;
                    cond = as_bool(&top);
                    if op == Opcode::OP_NOTIF {
                        cond = !cond;
                    }
                }
                cond_stack.push(cond);
                return Ok(());
            }
            Opcode::OP_ELSE => {
                let top = cond_stack.last_mut().ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
                return Ok(());
            }
            Opcode::OP_ENDIF => {
                cond_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                return Ok(());
            }
            _ => {}
        }

        if !executing {
            return Ok(());
        }

        match op {
            Opcode::OP_NOP => {}
            Opcode::OP_NOP1
            | Opcode::OP_NOP4
            | Opcode::OP_NOP5
            | Opcode::OP_NOP6
            | Opcode::OP_NOP7
            | Opcode::OP_NOP8
            | Opcode::OP_NOP9
            | Opcode::OP_NOP10 => {
                if self.has_flag(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                    return Err(ScriptError::DiscouragedNop);
                }
            }
            Opcode::OP_VERIFY => {
                let top = self.pop()?;
                if !as_bool(&top) {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            Opcode::OP_RETURN => return Err(ScriptError::OpReturn),
            Opcode::OP_DROP => {
                self.pop()?;
            }
            Opcode::OP_DUP => {
                let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                self.push(top)?;
            }
            Opcode::OP_EQUAL | Opcode::OP_EQUALVERIFY => {
                let a = self.pop()?;
                let b = self.pop()?;
                let equal = a == b;
                if op == Opcode::OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    self.push(if equal { vec![1] } else { Vec::new() })?;
                }
            }
            Opcode::OP_RIPEMD160 => {
                let top = self.pop()?;
                self.push(Ripemd160::digest(&top).to_vec())?;
            }
            Opcode::OP_SHA256 => {
                if !self.has_flag(VERIFY_SHA256) {
                    return Err(ScriptError::DisabledOpcode(op.to_byte()));
                }
                let top = self.pop()?;
                self.push(Sha256::digest(&top).to_vec())?;
            }
            Opcode::OP_HASH160 => {
                let top = self.pop()?;
                self.push(Ripemd160::digest(Sha256::digest(&top)).to_vec())?;
            }
            Opcode::OP_HASH256 => {
                let top = self.pop()?;
                self.push(Sha256::digest(Sha256::digest(&top)).to_vec())?;
            }
            Opcode::OP_CHECKSIG | Opcode::OP_CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let sig = self.pop()?;
                let valid = self.check_signature(&sig, &pubkey)?;
                if op == Opcode::OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    self.push(if valid { vec![1] } else { Vec::new() })?;
                }
            }
            Opcode::OP_CHECKMULTISIG | Opcode::OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig()?;
                if op == Opcode::OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err(ScriptError::MultisigFailed);
                    }
                } else {
                    self.push(if valid { vec![1] } else { Vec::new() })?;
                }
            }
            Opcode::OP_CHECKLOCKTIMEVERIFY => self.check_lock_time()?,
            Opcode::OP_CHECKSEQUENCEVERIFY => self.check_sequence()?,
            _ => return Err(ScriptError::InvalidOpcode(op.to_byte())),
        }
        Ok(())
    }

    fn check_signature(&self, sig: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError> {
        // An empty signature is an ordinary failure, not a format error.
        if sig.is_empty() {
            return Ok(false);
        }
        // The final byte is the signature hash type.
        let der = &sig[..sig.len() - 1];
        let hash_type = sig[sig.len() - 1];
        if self.has_flag(VERIFY_STRICT_ENCODING) && !(1..=3).contains(&hash_type) {
            return Err(ScriptError::InvalidSignature);
        }
        if self.has_flag(VERIFY_DER_SIGNATURES) || self.has_flag(VERIFY_STRICT_ENCODING) {
            let parsed = secp256k1::ecdsa::Signature::from_der(der)
                .map_err(|_| ScriptError::InvalidSignature)?;
            if self.has_flag(VERIFY_LOW_S) {
                let mut normalized = parsed;
                normalized.normalize_s();
                if normalized.serialize_compact() != parsed.serialize_compact() {
                    return Err(ScriptError::InvalidSignature);
                }
            }
        }
        if self.has_flag(VERIFY_STRICT_ENCODING)
            && secp256k1::PublicKey::from_slice(pubkey).is_err()
        {
            return Err(ScriptError::InvalidPubKey);
        }

        let checker = self.context.sig_checker.ok_or(ScriptError::NoSigChecker)?;
        Ok(checker(pubkey, der, &self.context.sig_hash))
    }

    fn check_multisig(&mut self) -> Result<bool, ScriptError> {
        let minimal = self.has_flag(VERIFY_MINIMAL_DATA);

        let n = script_num(&self.pop()?, minimal, 4)?;
        if n < 0 || n as usize > self.config.max_pubkeys_per_multisig {
            return Err(ScriptError::TooManyPubKeys);
        }
        let n = n as usize;
        let mut pubkeys = Vec::with_capacity(n);
        for _ in 0..n {
            pubkeys.push(self.pop()?);
        }
        pubkeys.reverse();

        let m = script_num(&self.pop()?, minimal, 4)?;
        if m < 0 || m as usize > n {
            return Err(ScriptError::InvalidMultisig);
        }
        let m = m as usize;
        let mut sigs = Vec::with_capacity(m);
        for _ in 0..m {
            sigs.push(self.pop()?);
        }
        sigs.reverse();

        // Signatures must match public keys in order.
        let mut key_idx = 0;
        for sig in &sigs {
            loop {
                if key_idx >= pubkeys.len() {
                    return Ok(false);
                }
                let valid = self.check_signature(sig, &pubkeys[key_idx])?;
                key_idx += 1;
                if valid {
                    break;
                }
            }
        }
        Ok(true)
    }

    fn check_lock_time(&mut self) -> Result<(), ScriptError> {
        if !self.has_flag(VERIFY_CHECK_LOCKTIME) {
            if self.has_flag(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                return Err(ScriptError::DiscouragedNop);
            }
            return Ok(());
        }
        let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?;
        let lock_time = script_num(top, self.has_flag(VERIFY_MINIMAL_DATA), 5)?;
        if lock_time < 0 {
            return Err(ScriptError::NegativeLocktime);
        }
        if lock_time > self.context.lock_time as i64 {
            return Err(ScriptError::LocktimeNotSatisfied);
        }
        // A finalized input can never satisfy a locktime.
        if self.context.sequence == u32::MAX {
            return Err(ScriptError::LocktimeNotSatisfied);
        }
        Ok(())
    }

    fn check_sequence(&mut self) -> Result<(), ScriptError> {
        if !self.has_flag(VERIFY_CHECK_SEQUENCE) {
            if self.has_flag(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                return Err(ScriptError::DiscouragedNop);
            }
            return Ok(());
        }
        let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?;
        let sequence = script_num(top, self.has_flag(VERIFY_MINIMAL_DATA), 5)?;
        if sequence < 0 {
            return Err(ScriptError::NegativeLocktime);
        }
        // High bit disables the relative locktime check.
        if sequence & (1 << 31) != 0 {
            return Ok(());
        }
        if (sequence as u32 & 0xFFFF) > (self.context.sequence & 0xFFFF) {
            return Err(ScriptError::SequenceNotSatisfied);
        }
        Ok(())
    }
}

// =============================================================================
// Spend Verification
// =============================================================================

/// Simulates spending `pk_script` with `sig_script` under the supplied
/// flags, including P2SH redemption.
pub fn verify_spend(
    sig_script: &[u8],
    pk_script: &[u8],
    context: ExecutionContext,
    flags: u32,
) -> Result<(), ScriptError> {
    let p2sh = flags & VERIFY_BIP16 != 0 && is_pay_to_script_hash(pk_script);
    if p2sh && !is_push_only(sig_script)? {
        return Err(ScriptError::SigPushOnly);
    }

    let mut engine = ScriptEngine::new(flags);
    engine.set_context(context.clone());
    engine.run(sig_script)?;
    let sig_stack = engine.stack.clone();

    engine.run(pk_script)?;
    match engine.stack.last() {
        Some(top) if as_bool(top) => {}
        _ => return Err(ScriptError::EvalFalse),
    }

    if p2sh {
        let mut stack = sig_stack;
        let redeem_script = stack.pop().ok_or(ScriptError::StackUnderflow)?;

        let mut engine = ScriptEngine::new(flags);
        engine.set_context(context);
        engine.stack = stack;
        engine.run(&redeem_script)?;
        match engine.stack.last() {
            Some(top) if as_bool(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }
        if flags & VERIFY_CLEAN_STACK != 0 && engine.stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
    } else if flags & VERIFY_CLEAN_STACK != 0 && engine.stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
