//! Transaction construction and validation

use crate::constants::*;
use crate::crypto::{sha256_hash, sign, verify};
use crate::types::*;
use rand::RngCore;

impl Transaction {
    pub fn new(output: PublicKey, input: Option<TxId>, signature: Signature) -> Self {
        Self {
            output,
            input,
            signature,
        }
    }

    /// Money-creation transaction paying one new coin to `output`.
    ///
    /// Carries `COINBASE_SIGNATURE_SIZE` random bytes instead of a signature,
    /// which keeps coinbase ids unique.
    pub fn coinbase(output: PublicKey) -> Self {
        let mut filler = vec![0u8; COINBASE_SIGNATURE_SIZE];
        rand::thread_rng().fill_bytes(&mut filler);
        Self::new(output, None, Signature(filler))
    }

    /// Bytes covered by the signature: `output ∥ input`
    pub fn message(&self) -> ByteString {
        transaction_message(&self.output, self.input.as_ref())
    }

    /// TxId = SHA256(output ∥ input ∥ signature)
    ///
    /// Recomputed from the fields on every call.
    pub fn id(&self) -> TxId {
        let mut data = self.message();
        data.extend_from_slice(&self.signature.0);
        TxId(sha256_hash(&data))
    }

    pub fn is_coinbase(&self) -> bool {
        self.input.is_none()
    }
}

/// Message signed when spending `input` to `output`
pub fn transaction_message(output: &PublicKey, input: Option<&TxId>) -> ByteString {
    let mut message = Vec::with_capacity(PUBLIC_KEY_SIZE + 32);
    message.extend_from_slice(&output.serialize());
    if let Some(input) = input {
        message.extend_from_slice(input.as_bytes());
    }
    message
}

/// Build a transaction spending `input` to `output`, signed with `key`
pub fn sign_transaction(output: PublicKey, input: TxId, key: &PrivateKey) -> Transaction {
    let signature = sign(&transaction_message(&output, Some(&input)), key);
    Transaction::new(output, Some(input), signature)
}

/// CheckTransactionSignature: 𝒯𝒳 × 𝒰𝒮 → {valid, invalid}
///
/// A spending transaction tx is valid against utxo set us iff:
/// 1. tx.input is present (coinbase transactions are never checked here)
/// 2. tx.input ∈ us
/// 3. verify(tx.message, tx.signature, us(tx.input).output)
pub fn check_transaction_signature(tx: &Transaction, utxo_set: &UtxoSet) -> ValidationResult {
    // 1. Reject transactions without an input
    let input = match &tx.input {
        Some(input) => input,
        None => {
            return ValidationResult::Invalid("Transaction has no input".to_string());
        }
    };

    // 2. The spent coin must be unspent
    let spent = match utxo_set.get(input) {
        Some(spent) => spent,
        None => {
            return ValidationResult::Invalid(format!("Input {} is not unspent", input));
        }
    };

    // 3. Only the owner of the spent coin may sign it away
    if !verify(&tx.message(), &tx.signature, &spent.output) {
        return ValidationResult::Invalid(format!(
            "Signature of transaction {} does not match the owner of {}",
            tx.id(),
            input
        ));
    }

    ValidationResult::Valid
}
