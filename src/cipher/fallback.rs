//! Reversible encoding used before both keys are exchanged.
//!
//! This is not encryption. Anyone holding the ciphertext can read it.

use crate::Error;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub(crate) fn encode(plaintext: &str) -> String {
    STANDARD.encode(plaintext.as_bytes())
}

pub(crate) fn decode(encoded: &str) -> Result<String, Error> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| Error::DecryptionFailed(format!("Invalid fallback encoding: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::DecryptionFailed("Fallback payload is not UTF-8".to_string()))
}
