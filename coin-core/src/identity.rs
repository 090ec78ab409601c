//! Identity provider: the locking script a node receives value under and the
//! signing operation that unlocks it.

use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use thiserror::Error;

use crate::hash::Hash256;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Signing error: {0}")]
    Signing(#[from] secp256k1::Error),

    #[error("Invalid locking script: {0}")]
    InvalidLockingScript(String),
}

/// Owner of a key able to receive and spend outputs
pub trait Identity: Send + Sync {
    /// Locking script that outputs payable to this identity carry
    fn locking_script(&self) -> String;

    /// Sign a 32-byte digest, returning the unlocking proof
    fn sign(&self, digest: &Hash256) -> Result<Vec<u8>, IdentityError>;
}

/// secp256k1 key pair; the locking script is the hex-encoded compressed public key
pub struct KeyPairIdentity {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPairIdentity {
    /// Create an identity with a random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        Self {
            secp,
            secret_key,
            public_key,
        }
    }

    /// Restore an identity from its 32-byte secret key
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secp,
            secret_key,
            public_key,
        })
    }

    /// Check an unlocking proof produced by [`Identity::sign`] against a locking script
    pub fn verify(locking_script: &str, digest: &Hash256, proof: &[u8]) -> Result<bool, IdentityError> {
        let key_bytes = hex::decode(locking_script)
            .map_err(|e| IdentityError::InvalidLockingScript(e.to_string()))?;
        let public_key = PublicKey::from_slice(&key_bytes)?;
        let signature = Signature::from_compact(proof)?;
        let message = Message::from_slice(digest)?;

        Ok(Secp256k1::verification_only()
            .verify_ecdsa(&message, &signature, &public_key)
            .is_ok())
    }
}

impl Identity for KeyPairIdentity {
    fn locking_script(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    fn sign(&self, digest: &Hash256) -> Result<Vec<u8>, IdentityError> {
        let message = Message::from_slice(digest)?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }
}

impl fmt::Debug for KeyPairIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairIdentity")
            .field("public_key", &self.locking_script())
            .finish_non_exhaustive()
    }
}
