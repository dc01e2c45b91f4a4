#[macro_use]
extern crate afl;
use hushpost::{CipherEngine, ConversationKeys};
use std::sync::Arc;

fn get_engine() -> CipherEngine {
    let keys = ConversationKeys::generate().expect("Setup failed");
    CipherEngine::new(Arc::new(keys), b"fuzz-context".to_vec())
}

fn main() {
    let engine = get_engine();

    fuzz!(|data: &[u8]| {
        if let Ok(ciphertext) = std::str::from_utf8(data) {
            let _ = engine.decrypt(ciphertext);
        }
    });
}
