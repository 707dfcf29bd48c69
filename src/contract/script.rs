// =============================================================================
// TUMBLEMIX v0.4 - Contract Scripts: Templates & Transaction Building
// =============================================================================
//
// The two P2SH output templates the exchange runs on and the machinery to
// build, sign-in and locally verify the transactions that spend them.
//
// Escrow contract, redeemable by one of two signature scripts:
//
//   <payer sig> <redeemer sig> 1
//   <payer sig> 0
//
// The first is the normal redemption path and requires both tumbler and
// client signatures. The second is the refund path, valid only after
// locktime.
//
// Offer contract, redeemable by:
//
//   <redeemer sig> <preimage 1> ... <preimage k> 1
//   <payer sig> 0
//
// The redeem branch checks each preimage against its hash before checking
// the redeemer's signature; the refund branch is as above.
//
// =============================================================================

use crate::contract::engine::{
    self, secp_sig_checker, ExecutionContext, STANDARD_VERIFY_FLAGS,
};
use crate::contract::opcodes::{Opcode, ScriptElement};
use crate::contract::tx::{
    estimate_redeem_serialize_size, estimate_refund_serialize_size, fee_for_serialize_size,
    is_dust_output, OutPoint, Transaction, TxIn, TxOut, FEE_PER_KB,
};
use crate::contract::{hash160, Contract, ContractError};

/// Hash opcode applied to offer preimages.
pub const OFFER_HASH_OP: Opcode = Opcode::OP_RIPEMD160;

// =============================================================================
// Script Builder
// =============================================================================

/// Fluent builder assembling scripts element by element.
#[derive(Clone, Debug, Default)]
pub struct ScriptBuilder {
    elements: Vec<ScriptElement>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder {
            elements: Vec::new(),
        }
    }

    pub fn op(mut self, opcode: Opcode) -> Self {
        self.elements.push(ScriptElement::Op(opcode));
        self
    }

    pub fn push_data(mut self, data: impl AsRef<[u8]>) -> Self {
        self.elements
            .push(ScriptElement::Data(data.as_ref().to_vec()));
        self
    }

    /// Pushes a number using the canonical small-int opcodes where they
    /// apply.
    pub fn push_int(self, num: i64) -> Self {
        if num == 0 {
            return self.op(Opcode::OP_0);
        }
        if (1..=16).contains(&num) {
            let op = Opcode::from_byte(0x50 + num as u8).expect("small int opcode");
            return self.op(op);
        }
        if num == -1 {
            return self.op(Opcode::OP_1NEGATE);
        }
        self.push_data(engine::encode_script_num(num))
    }

    pub fn build(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for element in self.elements {
            bytes.extend(element.serialize());
        }
        bytes
    }
}

// =============================================================================
// Output Templates
// =============================================================================

/// P2SH output paying to the hash of `script`.
pub fn pay_to_script_hash(script: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .op(Opcode::OP_HASH160)
        .push_data(hash160(script))
        .op(Opcode::OP_EQUAL)
        .build()
}

/// Standard P2PKH output for a 20-byte key hash.
pub fn pay_to_pubkey_hash(key_hash: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .op(Opcode::OP_DUP)
        .op(Opcode::OP_HASH160)
        .push_data(key_hash)
        .op(Opcode::OP_EQUALVERIFY)
        .op(Opcode::OP_CHECKSIG)
        .build()
}

/// Escrow contract: 2-of-2 multisig before locktime, payer-only refund
/// after.
pub fn build_escrow_contract(pk_payer: &[u8], pk_redeemer: &[u8], lock_time: i64) -> Vec<u8> {
    ScriptBuilder::new()
        .op(Opcode::OP_IF)
        // Normal redeem path: check 2-of-2 multisig.
        .push_int(2)
        .push_data(pk_payer)
        .push_data(pk_redeemer)
        .push_int(2)
        .op(Opcode::OP_CHECKMULTISIG)
        .op(Opcode::OP_ELSE)
        // Refund path: verify locktime and drop it off the stack (which
        // is not done by CLTV itself).
        .push_int(lock_time)
        .op(Opcode::OP_CLTV)
        .op(Opcode::OP_DROP)
        .push_data(pk_payer)
        .op(Opcode::OP_CHECKSIG)
        .op(Opcode::OP_ENDIF)
        .build()
}

/// Offer contract: hash preimages plus redeemer signature before
/// locktime, payer-only refund after. The hash opcode is configurable;
/// RIPEMD-160 in the running protocol.
pub fn build_offer_contract(
    pk_payer: &[u8],
    pk_redeemer: &[u8],
    hashes: &[Vec<u8>],
    hash_op: Opcode,
    lock_time: i64,
) -> Vec<u8> {
    let mut b = ScriptBuilder::new().op(Opcode::OP_IF);
    for h in hashes {
        b = b.op(hash_op).push_data(h).op(Opcode::OP_EQUALVERIFY);
    }
    b.push_data(pk_redeemer)
        .op(Opcode::OP_CHECKSIG)
        .op(Opcode::OP_ELSE)
        .push_int(lock_time)
        .op(Opcode::OP_CLTV)
        .op(Opcode::OP_DROP)
        .push_data(pk_payer)
        .op(Opcode::OP_CHECKSIG)
        .op(Opcode::OP_ENDIF)
        .build()
}

/// Signature script refunding a contract output with the contract
/// author's signature after locktime. Assumes P2SH and appends the
/// contract as the final data push.
pub fn refund_p2sh_contract(contract: &[u8], sig: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .push_data(sig)
        .push_int(0)
        .push_data(contract)
        .build()
}

/// Signature script redeeming a contract output with the redeemer's
/// signature and secret values. Assumes P2SH and appends the contract as
/// the final data push.
pub fn redeem_p2sh_contract(contract: &[u8], sig: &[u8], secrets: &[Vec<u8>]) -> Vec<u8> {
    let mut b = ScriptBuilder::new().push_data(sig);
    for secret in secrets {
        b = b.push_data(secret);
    }
    b.push_int(1).push_data(contract).build()
}

// =============================================================================
// Contract Transaction Building
// =============================================================================

impl Contract {
    /// Composes the escrow contract for the stored sender and receiver
    /// keys and derives its P2SH address and payment script.
    pub fn add_escrow_script(&mut self) -> Result<(), ContractError> {
        let script = build_escrow_contract(
            &self.sender_script_addr,
            &self.receiver_script_addr,
            self.lock_time as i64,
        );
        self.install_escrow_script(script)
    }

    /// Composes an offer contract for the given preimage hashes.
    pub fn add_offer_script(
        &mut self,
        hashes: &[Vec<u8>],
        hash_op: Opcode,
    ) -> Result<(), ContractError> {
        let script = build_offer_contract(
            &self.sender_script_addr,
            &self.receiver_script_addr,
            hashes,
            hash_op,
            self.lock_time as i64,
        );
        self.install_escrow_script(script)
    }

    /// Records a contract script and the derived P2SH address/payment
    /// script. Also used when importing a script supplied by a client.
    pub fn install_escrow_script(&mut self, script: Vec<u8>) -> Result<(), ContractError> {
        let addr = super::Address::p2sh_from_script(&script);
        self.escrow_addr_str = addr.encode(self.chain_params.unwrap_or(&crate::MAINNET));
        self.escrow_pay_script = pay_to_script_hash(&script);
        self.escrow_script = script;
        Ok(())
    }

    fn ensure_escrow_tx(&mut self) -> Result<(), ContractError> {
        if self.escrow_tx.is_none() {
            self.escrow_tx = Some(Transaction::deserialize(&self.escrow_bytes)?);
        }
        Ok(())
    }

    /// Index of the escrow P2SH output within the escrow transaction.
    fn find_contract_output(&self) -> Result<usize, ContractError> {
        let escrow_tx = self.escrow_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        escrow_tx
            .outputs
            .iter()
            .position(|o| o.pk_script == self.escrow_pay_script)
            .ok_or(ContractError::MissingEscrowOutput)
    }

    /// Creates the refund transaction spending the escrowed funds back
    /// after locktime. The input signature script is filled in later by
    /// add_refund_script.
    pub fn build_refund_tx(&mut self) -> Result<(), ContractError> {
        self.ensure_escrow_tx()?;
        let idx = self.find_contract_output()?;
        let escrow_tx = self.escrow_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        let escrow_out = &escrow_tx.outputs[idx];

        let mut tx = Transaction::new();
        tx.lock_time = self.lock_time as u32;
        tx.outputs
            .push(TxOut::new(0, pay_to_pubkey_hash(&self.refund_script_addr)));

        let refund_size = estimate_refund_serialize_size(&self.escrow_script, &tx.outputs);
        let refund_fee = fee_for_serialize_size(FEE_PER_KB, refund_size);
        tx.outputs[0].value = escrow_out.value - refund_fee;
        if is_dust_output(&tx.outputs[0], FEE_PER_KB) {
            return Err(ContractError::DustOutput(tx.outputs[0].value));
        }

        let mut txin = TxIn::new(
            OutPoint {
                hash: escrow_tx.tx_hash(),
                index: idx as u32,
                tree: 0,
            },
            escrow_out.value,
        );
        txin.sequence = 0;
        tx.inputs.push(txin);

        self.refund_bytes = tx.serialize();
        self.refund_tx = Some(tx);
        Ok(())
    }

    /// Completes the refund transaction with its signature script.
    pub fn add_refund_script(&mut self) -> Result<(), ContractError> {
        let script = refund_p2sh_contract(&self.escrow_script, &self.refund_sig);
        let tx = self.refund_tx.as_mut().ok_or(ContractError::BadEscrowTx)?;
        tx.inputs[0].signature_script = script.clone();
        self.refund_script = script;
        self.refund_bytes = tx.serialize();
        Ok(())
    }

    /// Simulates the refund spend with the network verification flags.
    pub fn verify_refund_tx(&mut self) -> Result<(), ContractError> {
        self.ensure_escrow_tx()?;
        let idx = self.find_contract_output()?;
        let tx = self.refund_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;

        let context = ExecutionContext {
            sig_hash: tx.signature_hash(0, &self.escrow_script).to_vec(),
            lock_time: tx.lock_time,
            sequence: tx.inputs[0].sequence,
            sig_checker: Some(secp_sig_checker),
        };
        let escrow_tx = self.escrow_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        engine::verify_spend(
            &tx.inputs[0].signature_script,
            &escrow_tx.outputs[idx].pk_script,
            context,
            STANDARD_VERIFY_FLAGS,
        )?;
        Ok(())
    }

    /// Creates the redeem transaction spending the escrow to the redeem
    /// address. `sig_script_add_size` accounts for extra signature script
    /// payload, such as hash preimages, when estimating fees.
    pub fn build_redeem_tx(&mut self, sig_script_add_size: usize) -> Result<(), ContractError> {
        self.ensure_escrow_tx()?;
        let idx = self.find_contract_output()?;
        let escrow_tx = self.escrow_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        let escrow_out = &escrow_tx.outputs[idx];

        let mut tx = Transaction::new();
        tx.lock_time = self.lock_time as u32;
        tx.outputs
            .push(TxOut::new(0, pay_to_pubkey_hash(&self.redeem_script_addr)));

        let redeem_size =
            estimate_redeem_serialize_size(&self.escrow_script, &tx.outputs, sig_script_add_size);
        let fee = fee_for_serialize_size(FEE_PER_KB, redeem_size);
        tx.outputs[0].value = escrow_out.value - fee;
        if is_dust_output(&tx.outputs[0], FEE_PER_KB) {
            return Err(ContractError::DustOutput(tx.outputs[0].value));
        }

        let mut txin = TxIn::new(
            OutPoint {
                hash: escrow_tx.tx_hash(),
                index: idx as u32,
                tree: 0,
            },
            escrow_out.value,
        );
        txin.sequence = 0;
        tx.inputs.push(txin);

        self.redeem_bytes = tx.serialize();
        self.redeem_tx = Some(tx);
        Ok(())
    }

    /// Completes the redeem transaction with its signature script
    /// carrying the secret values.
    pub fn add_redeem_script(&mut self, secrets: &[Vec<u8>]) -> Result<(), ContractError> {
        let script = redeem_p2sh_contract(&self.escrow_script, &self.redeem_sig, secrets);
        let tx = self.redeem_tx.as_mut().ok_or(ContractError::BadEscrowTx)?;
        tx.inputs[0].signature_script = script.clone();
        self.redeem_script = script;
        self.redeem_bytes = tx.serialize();
        Ok(())
    }

    /// Simulates the redeem spend with the network verification flags.
    pub fn verify_redeem_tx(&mut self) -> Result<(), ContractError> {
        self.ensure_escrow_tx()?;
        let idx = self.find_contract_output()?;
        let tx = self.redeem_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;

        let context = ExecutionContext {
            sig_hash: tx.signature_hash(0, &self.escrow_script).to_vec(),
            lock_time: tx.lock_time,
            sequence: tx.inputs[0].sequence,
            sig_checker: Some(secp_sig_checker),
        };
        let escrow_tx = self.escrow_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        engine::verify_spend(
            &tx.inputs[0].signature_script,
            &escrow_tx.outputs[idx].pk_script,
            context,
            STANDARD_VERIFY_FLAGS,
        )?;
        Ok(())
    }

    /// Extracts the data pushes from a redeem signature script, e.g. the
    /// hash preimages published by a fulfilling transaction.
    pub fn extract_redeem_data_pushes(
        &mut self,
        input: usize,
    ) -> Result<Vec<Vec<u8>>, ContractError> {
        if self.redeem_tx.is_none() {
            self.redeem_tx = Some(Transaction::deserialize(&self.redeem_bytes)?);
        }
        let tx = self.redeem_tx.as_ref().ok_or(ContractError::BadEscrowTx)?;
        let txin = tx.inputs.get(input).ok_or(ContractError::BadEscrowTx)?;
        Ok(engine::pushed_data(&txin.signature_script)?)
    }
}

// =============================================================================
// Tests
// =============================================================================
