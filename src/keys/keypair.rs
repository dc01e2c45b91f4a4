use crate::Error;
use crate::{X25519PublicKey, X25519Secret};
use ed25519_dalek::Signer;
use ed25519_dalek::{SecretKey, Signature, SigningKey, VerifyingKey, ed25519};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

/// Generates a cryptographically secure random 32-byte seed.
pub(crate) fn generate_random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(seed)
}

/// The key material one client holds for one conversation.
///
/// Two independent keypairs: an X25519 pair for confidentiality (peers encrypt
/// to its public half) and an Ed25519 pair that signs outgoing plaintext.
/// Unlike a long-term identity the two halves come from separate seeds, so
/// compromise of one says nothing about the other.
pub struct ConversationKeys {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl ConversationKeys {
    /// Creates fresh keypairs from the operating system RNG.
    pub fn generate() -> Result<Self, Error> {
        let mut signing_seed = generate_random_seed()?;
        let signing_key = Box::new(SigningKey::from(SecretKey::from(*signing_seed)));
        signing_seed.zeroize();

        let dh_key = X25519Secret::from(generate_random_seed()?);

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verifies a signature made by these keys.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), ed25519::Error> {
        self.signing_key
            .verifying_key()
            .verify_strict(message, signature)
    }

    /// Returns the public Ed25519 verification key.
    pub fn signing_key_public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the public X25519 key peers encrypt to.
    pub fn public_key(&self) -> X25519PublicKey {
        self.dh_key.public_key()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// Short digest of both public halves, for comparing keys out of band.
    ///
    /// Formatted as four groups of four hex digits, e.g. `3f2a 9c01 77be 0d4e`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.public_key().as_bytes());
        hasher.update(self.signing_key_public().as_bytes());
        let digest = hasher.finalize();

        let mut out = String::with_capacity(19);
        for (i, pair) in digest[..8].chunks(2).enumerate() {
            if i > 0 {
                out.push(' ');
            }
            for byte in pair {
                let _ = write!(out, "{byte:02x}");
            }
        }
        out
    }

    /// Serializes both secrets to a 64-byte array.
    ///
    /// The first 32 bytes contain the Ed25519 private key,
    /// and the last 32 bytes contain the X25519 private key.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(self.dh_key.as_bytes());

        bytes
    }
}

impl From<[u8; 64]> for ConversationKeys {
    /// Restores keys from the layout produced by [`ConversationKeys::to_bytes`].
    fn from(mut bytes: [u8; 64]) -> Self {
        let mut private_sk_bytes = Box::new([0u8; 32]);
        private_sk_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&private_sk_bytes));
        private_sk_bytes.zeroize();

        let mut private_dh_bytes = Box::new([0u8; 32]);
        private_dh_bytes.copy_from_slice(&bytes[32..64]);
        let dh_key = X25519Secret::from(private_dh_bytes);

        bytes.zeroize();

        Self {
            signing_key,
            dh_key,
        }
    }
}
