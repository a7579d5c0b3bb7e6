//! Crypto adapter: key generation, signing and verification
//!
//! Thin layer over secp256k1 ECDSA. Messages are hashed with SHA-256 before
//! signing; signatures travel in compact 64-byte form.

use crate::constants::SIGNATURE_SIZE;
use crate::error::{LedgerError, Result};
use crate::types::*;
use secp256k1::{ecdsa, Message, SECP256K1};
use sha2::{Digest, Sha256};

/// Generate a fresh key pair
pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    SECP256K1.generate_keypair(&mut rand::thread_rng())
}

/// Sign `message` with `key`
pub fn sign(message: &[u8], key: &PrivateKey) -> Signature {
    let digest = message_digest(message);
    let signature = SECP256K1.sign_ecdsa(&digest, key);
    Signature(signature.serialize_compact().to_vec())
}

/// Verify that `signature` over `message` was produced by the owner of `key`.
///
/// Malformed signature bytes verify as false.
pub fn verify(message: &[u8], signature: &Signature, key: &PublicKey) -> bool {
    let signature = match parse_signature(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let digest = message_digest(message);
    SECP256K1.verify_ecdsa(&digest, &signature, key).is_ok()
}

/// Decode compact signature bytes
pub fn parse_signature(signature: &Signature) -> Result<ecdsa::Signature> {
    if signature.0.len() != SIGNATURE_SIZE {
        return Err(LedgerError::InvalidSignature(format!(
            "Expected {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.0.len()
        )));
    }

    ecdsa::Signature::from_compact(&signature.0).map_err(|e| LedgerError::InvalidSignature(e.to_string()))
}

/// SHA-256 of `data`
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn message_digest(message: &[u8]) -> Message {
    Message::from_digest(sha256_hash(message))
}
