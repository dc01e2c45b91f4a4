use std::time::Duration;

/// Tunables for a [`ChatClient`](crate::ChatClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// How long to wait for the peer's key before sending in fallback mode.
    pub exchange_timeout: Duration,
    /// How often relay readiness is re-polled while waiting for the peer.
    pub readiness_poll_interval: Duration,
    /// How many messages a conversation load fetches from history.
    pub history_limit: usize,
    /// Shown in place of a message that no decode strategy could open.
    pub placeholder: String,
    /// HKDF info binding sealed ciphertexts to this application.
    pub protocol_info: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(10),
            readiness_poll_interval: Duration::from_millis(500),
            history_limit: 50,
            placeholder: "[Encrypted message: unable to decrypt]".to_string(),
            protocol_info: b"Hushpost-E2E-v1".to_vec(),
        }
    }
}

/// Limits enforced by the relay.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Upper bound on `limit` for history reads.
    pub max_history_limit: usize,
    /// Largest accepted base64 ciphertext.
    pub max_ciphertext_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_history_limit: 200,
            max_ciphertext_len: 64 * 1024,
        }
    }
}
