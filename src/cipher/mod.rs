mod decode;
pub use decode::*;
mod fallback;
mod sealed;

use crate::{ConversationKeys, EncryptionMode, Error, MessageSignature, X25519PublicKey};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Whether a decoded message's signature checked out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Signed by the peer's published signing key.
    Verified,
    /// Signed, but the peer published no signing key to check it against.
    Unverified,
    /// The signature does not match the plaintext.
    Invalid,
    /// Fallback messages are not signed.
    NotApplicable,
}

/// Everything that goes on the wire for one outgoing message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingPayload {
    /// Base64 payload.
    pub ciphertext: String,
    /// Signature or fallback sentinel.
    pub signature: MessageSignature,
    /// Base64 SHA-256 of the plaintext.
    pub content_hash: String,
    /// Which path produced the payload.
    pub mode: EncryptionMode,
}

/// Message-level crypto for one conversation, bound to the local keys.
#[derive(Clone)]
pub struct CipherEngine {
    keys: Arc<ConversationKeys>,
    info: Vec<u8>,
}

impl CipherEngine {
    /// Creates an engine using `info` as the HKDF context.
    pub fn new(keys: Arc<ConversationKeys>, info: impl Into<Vec<u8>>) -> Self {
        Self {
            keys,
            info: info.into(),
        }
    }

    /// Seals `plaintext` to the recipient's confidentiality key. Returns base64.
    pub fn encrypt(&self, plaintext: &[u8], recipient: &X25519PublicKey) -> Result<String, Error> {
        let sealed = sealed::seal(recipient, plaintext, &self.info)?;
        Ok(STANDARD.encode(sealed))
    }

    /// Opens a base64 payload with the local confidentiality key.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, Error> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|err| Error::DecryptionFailed(format!("Invalid ciphertext encoding: {err}")))?;
        sealed::open(&self.keys, &sealed, &self.info)
    }

    /// Signs `plaintext` with the local signing key. Returns base64.
    pub fn sign(&self, plaintext: &[u8]) -> String {
        STANDARD.encode(self.keys.sign(plaintext).to_bytes())
    }

    /// Checks a base64 signature against `signer`.
    pub fn verify(&self, plaintext: &[u8], signature: &str, signer: &VerifyingKey) -> Verification {
        let Ok(bytes) = STANDARD.decode(signature) else {
            return Verification::Invalid;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return Verification::Invalid;
        };

        match signer.verify_strict(plaintext, &signature) {
            Ok(()) => Verification::Verified,
            Err(_) => Verification::Invalid,
        }
    }

    /// Base64 SHA-256 digest of `plaintext`.
    pub fn hash(plaintext: &[u8]) -> String {
        STANDARD.encode(Sha256::digest(plaintext))
    }

    /// Produces the wire payload for `plaintext`.
    ///
    /// With the peer's key the text is sealed and signed. Without it the text
    /// is fallback-encoded and carries the sentinel signature.
    pub fn seal_outgoing(
        &self,
        plaintext: &str,
        peer_key: Option<&X25519PublicKey>,
    ) -> Result<OutgoingPayload, Error> {
        let content_hash = Self::hash(plaintext.as_bytes());

        match peer_key {
            Some(peer_key) => Ok(OutgoingPayload {
                ciphertext: self.encrypt(plaintext.as_bytes(), peer_key)?,
                signature: MessageSignature::Signed(self.sign(plaintext.as_bytes())),
                content_hash,
                mode: EncryptionMode::Sealed,
            }),
            None => Ok(OutgoingPayload {
                ciphertext: fallback::encode(plaintext),
                signature: MessageSignature::Fallback,
                content_hash,
                mode: EncryptionMode::Fallback,
            }),
        }
    }

    /// Whether `plaintext` matches the digest a message carried.
    pub fn hash_matches(plaintext: &str, content_hash: &str) -> bool {
        Self::hash(plaintext.as_bytes()) == content_hash
    }
}
