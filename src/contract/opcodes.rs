// =============================================================================
// TUMBLEMIX v0.4 - Contract Scripts: Opcodes
// =============================================================================
//
// Opcode definitions for the script dialect the escrow and offer contracts
// use. The table is limited to the operations those templates and their
// spending scripts can produce.
//
// =============================================================================

use std::fmt;

/// Supported opcodes. Raw data pushes (0x01-0x4B) are handled numerically
/// by the parser and don't appear here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    /// Push empty byte array (false)
    OP_0 = 0x00,
    /// Next byte is length, then push that many bytes
    OP_PUSHDATA1 = 0x4C,
    /// Next 2 bytes are length (LE), then push that many bytes
    OP_PUSHDATA2 = 0x4D,
    /// Next 4 bytes are length (LE), then push that many bytes
    OP_PUSHDATA4 = 0x4E,
    /// Push -1
    OP_1NEGATE = 0x4F,
    /// Push 1 (true)
    OP_1 = 0x51,
    OP_2 = 0x52,
    OP_3 = 0x53,
    OP_4 = 0x54,
    OP_5 = 0x55,
    OP_6 = 0x56,
    OP_7 = 0x57,
    OP_8 = 0x58,
    OP_9 = 0x59,
    OP_10 = 0x5A,
    OP_11 = 0x5B,
    OP_12 = 0x5C,
    OP_13 = 0x5D,
    OP_14 = 0x5E,
    OP_15 = 0x5F,
    OP_16 = 0x60,

    /// Do nothing
    OP_NOP = 0x61,
    /// Execute the branch when top of stack is true
    OP_IF = 0x63,
    /// Execute the branch when top of stack is false
    OP_NOTIF = 0x64,
    /// Alternate branch of IF
    OP_ELSE = 0x67,
    /// End of IF block
    OP_ENDIF = 0x68,
    /// Fail unless top of stack is true
    OP_VERIFY = 0x69,
    /// Always fail
    OP_RETURN = 0x6A,

    /// Remove top item
    OP_DROP = 0x75,
    /// Duplicate top item
    OP_DUP = 0x76,

    /// True when top two items are equal byte-by-byte
    OP_EQUAL = 0x87,
    /// OP_EQUAL then OP_VERIFY
    OP_EQUALVERIFY = 0x88,

    /// RIPEMD-160 hash
    OP_RIPEMD160 = 0xA6,
    /// SHA-256 hash
    OP_SHA256 = 0xA8,
    /// SHA-256 then RIPEMD-160
    OP_HASH160 = 0xA9,
    /// Double SHA-256
    OP_HASH256 = 0xAA,
    /// Check signature
    OP_CHECKSIG = 0xAC,
    /// OP_CHECKSIG then OP_VERIFY
    OP_CHECKSIGVERIFY = 0xAD,
    /// Check m-of-n multisig
    OP_CHECKMULTISIG = 0xAE,
    /// OP_CHECKMULTISIG then OP_VERIFY
    OP_CHECKMULTISIGVERIFY = 0xAF,

    /// Upgradable no-op
    OP_NOP1 = 0xB0,
    /// Absolute locktime check
    OP_CHECKLOCKTIMEVERIFY = 0xB1,
    /// Relative locktime check
    OP_CHECKSEQUENCEVERIFY = 0xB2,
    OP_NOP4 = 0xB3,
    OP_NOP5 = 0xB4,
    OP_NOP6 = 0xB5,
    OP_NOP7 = 0xB6,
    OP_NOP8 = 0xB7,
    OP_NOP9 = 0xB8,
    OP_NOP10 = 0xB9,
}

impl Opcode {
    /// Decodes an opcode byte. Data pushes and unknown bytes return None.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Opcode::OP_0,
            0x4C => Opcode::OP_PUSHDATA1,
            0x4D => Opcode::OP_PUSHDATA2,
            0x4E => Opcode::OP_PUSHDATA4,
            0x4F => Opcode::OP_1NEGATE,
            0x51..=0x60 => SMALL_INTS[(byte - 0x51) as usize],
            0x61 => Opcode::OP_NOP,
            0x63 => Opcode::OP_IF,
            0x64 => Opcode::OP_NOTIF,
            0x67 => Opcode::OP_ELSE,
            0x68 => Opcode::OP_ENDIF,
            0x69 => Opcode::OP_VERIFY,
            0x6A => Opcode::OP_RETURN,
            0x75 => Opcode::OP_DROP,
            0x76 => Opcode::OP_DUP,
            0x87 => Opcode::OP_EQUAL,
            0x88 => Opcode::OP_EQUALVERIFY,
            0xA6 => Opcode::OP_RIPEMD160,
            0xA8 => Opcode::OP_SHA256,
            0xA9 => Opcode::OP_HASH160,
            0xAA => Opcode::OP_HASH256,
            0xAC => Opcode::OP_CHECKSIG,
            0xAD => Opcode::OP_CHECKSIGVERIFY,
            0xAE => Opcode::OP_CHECKMULTISIG,
            0xAF => Opcode::OP_CHECKMULTISIGVERIFY,
            0xB0 => Opcode::OP_NOP1,
            0xB1 => Opcode::OP_CHECKLOCKTIMEVERIFY,
            0xB2 => Opcode::OP_CHECKSEQUENCEVERIFY,
            0xB3 => Opcode::OP_NOP4,
            0xB4 => Opcode::OP_NOP5,
            0xB5 => Opcode::OP_NOP6,
            0xB6 => Opcode::OP_NOP7,
            0xB7 => Opcode::OP_NOP8,
            0xB8 => Opcode::OP_NOP9,
            0xB9 => Opcode::OP_NOP10,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::OP_0 => "OP_0",
            Opcode::OP_PUSHDATA1 => "OP_PUSHDATA1",
            Opcode::OP_PUSHDATA2 => "OP_PUSHDATA2",
            Opcode::OP_PUSHDATA4 => "OP_PUSHDATA4",
            Opcode::OP_1NEGATE => "OP_1NEGATE",
            Opcode::OP_1 => "OP_1",
            Opcode::OP_2 => "OP_2",
            Opcode::OP_3 => "OP_3",
            Opcode::OP_4 => "OP_4",
            Opcode::OP_5 => "OP_5",
            Opcode::OP_6 => "OP_6",
            Opcode::OP_7 => "OP_7",
            Opcode::OP_8 => "OP_8",
            Opcode::OP_9 => "OP_9",
            Opcode::OP_10 => "OP_10",
            Opcode::OP_11 => "OP_11",
            Opcode::OP_12 => "OP_12",
            Opcode::OP_13 => "OP_13",
            Opcode::OP_14 => "OP_14",
            Opcode::OP_15 => "OP_15",
            Opcode::OP_16 => "OP_16",
            Opcode::OP_NOP => "OP_NOP",
            Opcode::OP_IF => "OP_IF",
            Opcode::OP_NOTIF => "OP_NOTIF",
            Opcode::OP_ELSE => "OP_ELSE",
            Opcode::OP_ENDIF => "OP_ENDIF",
            Opcode::OP_VERIFY => "OP_VERIFY",
            Opcode::OP_RETURN => "OP_RETURN",
            Opcode::OP_DROP => "OP_DROP",
            Opcode::OP_DUP => "OP_DUP",
            Opcode::OP_EQUAL => "OP_EQUAL",
            Opcode::OP_EQUALVERIFY => "OP_EQUALVERIFY",
            Opcode::OP_RIPEMD160 => "OP_RIPEMD160",
            Opcode::OP_SHA256 => "OP_SHA256",
            Opcode::OP_HASH160 => "OP_HASH160",
            Opcode::OP_HASH256 => "OP_HASH256",
            Opcode::OP_CHECKSIG => "OP_CHECKSIG",
            Opcode::OP_CHECKSIGVERIFY => "OP_CHECKSIGVERIFY",
            Opcode::OP_CHECKMULTISIG => "OP_CHECKMULTISIG",
            Opcode::OP_CHECKMULTISIGVERIFY => "OP_CHECKMULTISIGVERIFY",
            Opcode::OP_NOP1 => "OP_NOP1",
            Opcode::OP_CHECKLOCKTIMEVERIFY => "OP_CHECKLOCKTIMEVERIFY",
            Opcode::OP_CHECKSEQUENCEVERIFY => "OP_CHECKSEQUENCEVERIFY",
            Opcode::OP_NOP4 => "OP_NOP4",
            Opcode::OP_NOP5 => "OP_NOP5",
            Opcode::OP_NOP6 => "OP_NOP6",
            Opcode::OP_NOP7 => "OP_NOP7",
            Opcode::OP_NOP8 => "OP_NOP8",
            Opcode::OP_NOP9 => "OP_NOP9",
            Opcode::OP_NOP10 => "OP_NOP10",
        }
    }
}

const SMALL_INTS: [Opcode; 16] = [
    Opcode::OP_1,
    Opcode::OP_2,
    Opcode::OP_3,
    Opcode::OP_4,
    Opcode::OP_5,
    Opcode::OP_6,
    Opcode::OP_7,
    Opcode::OP_8,
    Opcode::OP_9,
    Opcode::OP_10,
    Opcode::OP_11,
    Opcode::OP_12,
    Opcode::OP_13,
    Opcode::OP_14,
    Opcode::OP_15,
    Opcode::OP_16,
];

impl Opcode {
    pub const OP_FALSE: Opcode = Opcode::OP_0;
    pub const OP_TRUE: Opcode = Opcode::OP_1;
    pub const OP_CLTV: Opcode = Opcode::OP_CHECKLOCKTIMEVERIFY;
    pub const OP_CSV: Opcode = Opcode::OP_CHECKSEQUENCEVERIFY;
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Script Element
// =============================================================================

/// Element in a script under construction: an opcode or a data push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptElement {
    Op(Opcode),
    Data(Vec<u8>),
}

impl ScriptElement {
    /// Serializes the element with canonical (minimal) push encoding.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            ScriptElement::Op(op) => vec![op.to_byte()],
            ScriptElement::Data(data) => serialize_push(data),
        }
    }
}

/// Canonical data push: small ints become OP_N, short data a direct push,
/// longer data the smallest PUSHDATA form.
pub fn serialize_push(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    if len == 0 {
        return vec![Opcode::OP_0.to_byte()];
    }
    if len == 1 && data[0] >= 1 && data[0] <= 16 {
        return vec![0x50 + data[0]];
    }
    if len == 1 && data[0] == 0x81 {
        return vec![Opcode::OP_1NEGATE.to_byte()];
    }
    let mut result;
    if len <= 75 {
        result = vec![len as u8];
    } else if len <= 255 {
        result = vec![Opcode::OP_PUSHDATA1.to_byte(), len as u8];
    } else if len <= 65535 {
        result = vec![Opcode::OP_PUSHDATA2.to_byte()];
        result.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        result = vec![Opcode::OP_PUSHDATA4.to_byte()];
        result.extend_from_slice(&(len as u32).to_le_bytes());
    }
    result.extend_from_slice(data);
    result
}

// =============================================================================
// Tests
// =============================================================================
