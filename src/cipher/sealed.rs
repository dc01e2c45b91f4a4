use crate::{ConversationKeys, Error, X25519PublicKey, X25519Secret, generate_random_seed};
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

const VERSION: u8 = 0x01;
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12; // AES-GCM-SIV uses 12-byte (96-bit) nonces
const HEADER_SIZE: usize = 1 + 32;
const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` so that only the holder of `recipient`'s secret can open it.
///
/// Format: [version (1 byte)][ephemeral public key (32 bytes)][AES-256-GCM-SIV ciphertext]
///
/// A fresh ephemeral key per message means the derived key and nonce are
/// never reused, so both come straight out of HKDF.
pub(crate) fn seal(
    recipient: &X25519PublicKey,
    plaintext: &[u8],
    info: &[u8],
) -> Result<Vec<u8>, Error> {
    let ephemeral = X25519Secret::from(generate_random_seed()?);
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.dh(recipient);
    let mut header = [0u8; HEADER_SIZE];
    header[0] = VERSION;
    header[1..].copy_from_slice(ephemeral_public.as_bytes());

    let ciphertext = with_message_key(shared, &ephemeral_public, recipient, info, |cipher, nonce| {
        cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
    })?;

    let mut result = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    result.extend_from_slice(&header);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Opens a payload produced by [`seal`] with the local confidentiality key.
pub(crate) fn open(keys: &ConversationKeys, sealed: &[u8], info: &[u8]) -> Result<Vec<u8>, Error> {
    if sealed.len() < HEADER_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("Payload too short".to_string()));
    }
    if sealed[0] != VERSION {
        return Err(Error::DecryptionFailed(format!(
            "Unknown payload version {}",
            sealed[0]
        )));
    }

    let (header, ciphertext) = sealed.split_at(HEADER_SIZE);
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&header[1..]);
    let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);

    let shared = keys.dh(&ephemeral_public);
    with_message_key(shared, &ephemeral_public, &keys.public_key(), info, |cipher, nonce| {
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| Error::DecryptionFailed("Authentication failed".to_string()))
    })
}

/// Derives the per-message AEAD key and nonce and hands them to `f`.
///
/// The salt binds both public keys, so a ciphertext cannot be replayed under a
/// different recipient.
fn with_message_key<F>(
    shared: SharedSecret,
    ephemeral_public: &X25519PublicKey,
    recipient: &X25519PublicKey,
    info: &[u8],
    f: F,
) -> Result<Vec<u8>, Error>
where
    F: FnOnce(&Aes256GcmSiv, &Nonce) -> Result<Vec<u8>, Error>,
{
    if !shared.was_contributory() {
        return Err(Error::DecryptionFailed(
            "Non-contributory key agreement".to_string(),
        ));
    }

    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    drop(shared);

    let mut derived_material = [0u8; KEY_SIZE + NONCE_SIZE];
    hkdf.expand(info, &mut derived_material)
        .map_err(|err| Error::Crypto(format!("HKDF expansion failed: {err}")))?;

    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(&derived_material[..KEY_SIZE]);
    let cipher = Aes256GcmSiv::new(key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&derived_material[KEY_SIZE..]);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let result = f(&cipher, nonce);
    derived_material.zeroize();
    result
}
