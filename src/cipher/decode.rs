//! Turning stored messages back into text.
//!
//! A message may be readable in several ways: the sender's own plaintext
//! mirror, the sealed path, or the fallback encoding. Strategies are tried in
//! order and the first that decodes wins. When none does the caller gets a
//! placeholder, never an error.

use crate::cipher::{CipherEngine, Verification, fallback};
use crate::{EncryptionMode, Error, Message, MessageSignature};
use ed25519_dalek::VerifyingKey;

/// What a strategy is given to work with.
#[derive(Clone, Copy, Debug)]
pub struct DecodeInput<'a> {
    /// The stored message.
    pub message: &'a Message,
    /// Locally mirrored plaintext, present only for self-sent messages.
    pub cached_plaintext: Option<&'a str>,
    /// The author's published verification key, if known.
    pub sender_signing_key: Option<&'a VerifyingKey>,
}

/// Tagged result of a single strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeAttempt {
    /// The strategy produced plaintext.
    Decoded(String),
    /// The strategy does not apply to this message.
    NotApplicable,
    /// The strategy applied but could not decode.
    Failed(Error),
}

/// One way of recovering plaintext.
pub trait DecodeStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The mode reported when this strategy succeeds.
    fn mode(&self, message: &Message) -> EncryptionMode;

    /// Tries to decode.
    fn attempt(&self, engine: &CipherEngine, input: &DecodeInput<'_>) -> DecodeAttempt;
}

/// Plaintext the sender mirrored locally when it sent the message.
pub struct LocalCacheStrategy;

impl DecodeStrategy for LocalCacheStrategy {
    fn name(&self) -> &'static str {
        "local-cache"
    }

    fn mode(&self, message: &Message) -> EncryptionMode {
        message.encryption_mode()
    }

    fn attempt(&self, _: &CipherEngine, input: &DecodeInput<'_>) -> DecodeAttempt {
        match input.cached_plaintext {
            Some(text) => DecodeAttempt::Decoded(text.to_string()),
            None => DecodeAttempt::NotApplicable,
        }
    }
}

/// Opens sealed payloads with the local confidentiality key.
pub struct SealedStrategy;

impl DecodeStrategy for SealedStrategy {
    fn name(&self) -> &'static str {
        "sealed"
    }

    fn mode(&self, _: &Message) -> EncryptionMode {
        EncryptionMode::Sealed
    }

    fn attempt(&self, engine: &CipherEngine, input: &DecodeInput<'_>) -> DecodeAttempt {
        if input.message.is_fallback() {
            return DecodeAttempt::NotApplicable;
        }

        match engine.decrypt(&input.message.ciphertext) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => DecodeAttempt::Decoded(text),
                Err(_) => DecodeAttempt::Failed(Error::DecryptionFailed(
                    "Plaintext is not UTF-8".to_string(),
                )),
            },
            Err(err) => DecodeAttempt::Failed(err),
        }
    }
}

/// Reverses the pre-exchange encoding.
pub struct FallbackStrategy;

impl DecodeStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn mode(&self, _: &Message) -> EncryptionMode {
        EncryptionMode::Fallback
    }

    fn attempt(&self, _: &CipherEngine, input: &DecodeInput<'_>) -> DecodeAttempt {
        if !input.message.is_fallback() {
            return DecodeAttempt::NotApplicable;
        }

        match fallback::decode(&input.message.ciphertext) {
            Ok(text) => DecodeAttempt::Decoded(text),
            Err(err) => DecodeAttempt::Failed(err),
        }
    }
}

/// Final result of running the chain over a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Plaintext or the placeholder.
    pub text: String,
    /// How the message was protected, or [`EncryptionMode::Undecodable`].
    pub mode: EncryptionMode,
    /// Name of the strategy that decoded it.
    pub strategy: Option<&'static str>,
    /// Signature check result.
    pub verification: Verification,
    /// Whether the plaintext matches the message's content hash.
    pub hash_matches: bool,
}

/// Ordered list of decode strategies.
pub struct DecodeChain {
    strategies: Vec<Box<dyn DecodeStrategy>>,
    placeholder: String,
}

impl DecodeChain {
    /// The standard order: local cache, sealed, fallback.
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self::with_strategies(
            vec![
                Box::new(LocalCacheStrategy),
                Box::new(SealedStrategy),
                Box::new(FallbackStrategy),
            ],
            placeholder,
        )
    }

    /// A chain with a custom strategy order.
    pub fn with_strategies(
        strategies: Vec<Box<dyn DecodeStrategy>>,
        placeholder: impl Into<String>,
    ) -> Self {
        Self {
            strategies,
            placeholder: placeholder.into(),
        }
    }

    /// Runs the strategies in order. Never fails.
    pub fn decode(&self, engine: &CipherEngine, input: &DecodeInput<'_>) -> DecodeOutcome {
        let message = input.message;

        for strategy in &self.strategies {
            match strategy.attempt(engine, input) {
                DecodeAttempt::Decoded(text) => {
                    let mode = strategy.mode(message);
                    let verification = verify(engine, &text, input);
                    let hash_matches = CipherEngine::hash_matches(&text, &message.content_hash);
                    if !hash_matches {
                        tracing::warn!(
                            message = %message.id,
                            strategy = strategy.name(),
                            "decoded plaintext does not match content hash"
                        );
                    }

                    return DecodeOutcome {
                        text,
                        mode,
                        strategy: Some(strategy.name()),
                        verification,
                        hash_matches,
                    };
                }
                DecodeAttempt::NotApplicable => {}
                DecodeAttempt::Failed(err) => {
                    tracing::debug!(
                        message = %message.id,
                        strategy = strategy.name(),
                        error = %err,
                        "decode strategy failed"
                    );
                }
            }
        }

        tracing::warn!(message = %message.id, "no decode strategy could open message");
        DecodeOutcome {
            text: self.placeholder.clone(),
            mode: EncryptionMode::Undecodable,
            strategy: None,
            verification: Verification::NotApplicable,
            hash_matches: false,
        }
    }
}

fn verify(engine: &CipherEngine, text: &str, input: &DecodeInput<'_>) -> Verification {
    match (&input.message.signature, input.sender_signing_key) {
        (MessageSignature::Fallback, _) => Verification::NotApplicable,
        (MessageSignature::Signed(_), None) => Verification::Unverified,
        (MessageSignature::Signed(signature), Some(signer)) => {
            engine.verify(text.as_bytes(), signature, signer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversationId, ConversationKeys, DeliveryStatus, MessageId, MessageKind, UserId};
    use chrono::Utc;
    use std::sync::Arc;

    const PLACEHOLDER: &str = "[unreadable]";

    struct Party {
        keys: Arc<ConversationKeys>,
        engine: CipherEngine,
    }

    fn party() -> Party {
        let keys = Arc::new(ConversationKeys::generate().unwrap());
        Party {
            engine: CipherEngine::new(keys.clone(), b"test".to_vec()),
            keys,
        }
    }

    fn message(text: &str, from: &Party, to: Option<&Party>) -> Message {
        let payload = from
            .engine
            .seal_outgoing(text, to.map(|p| p.keys.public_key()).as_ref())
            .unwrap();
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            sender_id: UserId::new(),
            recipient_id: UserId::new(),
            ciphertext: payload.ciphertext,
            signature: payload.signature,
            content_hash: payload.content_hash,
            kind: MessageKind::Text,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        }
    }

    fn input<'a>(
        message: &'a Message,
        cached: Option<&'a str>,
        signer: Option<&'a VerifyingKey>,
    ) -> DecodeInput<'a> {
        DecodeInput {
            message,
            cached_plaintext: cached,
            sender_signing_key: signer,
        }
    }

    #[test]
    fn test_recipient_opens_sealed_and_verifies() {
        let alice = party();
        let bob = party();
        let msg = message("secret", &alice, Some(&bob));
        let alice_signer = alice.keys.signing_key_public();

        let outcome = DecodeChain::new(PLACEHOLDER)
            .decode(&bob.engine, &input(&msg, None, Some(&alice_signer)));

        assert_eq!(outcome.text, "secret");
        assert_eq!(outcome.mode, EncryptionMode::Sealed);
        assert_eq!(outcome.strategy, Some("sealed"));
        assert_eq!(outcome.verification, Verification::Verified);
        assert!(outcome.hash_matches);
    }

    #[test]
    fn test_sender_reads_own_sealed_from_cache() {
        let alice = party();
        let bob = party();
        let msg = message("secret", &alice, Some(&bob));
        let chain = DecodeChain::new(PLACEHOLDER);

        let without_cache = chain.decode(&alice.engine, &input(&msg, None, None));
        assert_eq!(without_cache.text, PLACEHOLDER);
        assert_eq!(without_cache.mode, EncryptionMode::Undecodable);

        let with_cache = chain.decode(&alice.engine, &input(&msg, Some("secret"), None));
        assert_eq!(with_cache.text, "secret");
        assert_eq!(with_cache.strategy, Some("local-cache"));
        assert_eq!(with_cache.mode, EncryptionMode::Sealed);
        assert_eq!(with_cache.verification, Verification::Unverified);
    }

    #[test]
    fn test_fallback_decodes_for_both_parties() {
        let alice = party();
        let bob = party();
        let msg = message("hello", &alice, None);
        let chain = DecodeChain::new(PLACEHOLDER);

        for engine in [&alice.engine, &bob.engine] {
            let outcome = chain.decode(engine, &input(&msg, None, None));
            assert_eq!(outcome.text, "hello");
            assert_eq!(outcome.mode, EncryptionMode::Fallback);
            assert_eq!(outcome.verification, Verification::NotApplicable);
        }
    }

    #[test]
    fn test_forged_signature_is_flagged() {
        let alice = party();
        let bob = party();
        let mallory = party();
        let msg = message("pay me", &mallory, Some(&bob));
        let alice_signer = alice.keys.signing_key_public();

        let outcome = DecodeChain::new(PLACEHOLDER)
            .decode(&bob.engine, &input(&msg, None, Some(&alice_signer)));
        assert_eq!(outcome.text, "pay me");
        assert_eq!(outcome.verification, Verification::Invalid);
    }

    #[test]
    fn test_garbage_yields_placeholder() {
        let bob = party();
        let alice = party();
        let mut msg = message("x", &alice, Some(&bob));
        msg.ciphertext = "bm9wZQ==".to_string();

        let outcome = DecodeChain::new(PLACEHOLDER).decode(&bob.engine, &input(&msg, None, None));
        assert_eq!(outcome.text, PLACEHOLDER);
        assert_eq!(outcome.strategy, None);
    }

    #[test]
    fn test_strategy_results_are_tagged() {
        let alice = party();
        let bob = party();
        let sealed = message("secret", &alice, Some(&bob));

        assert_eq!(
            FallbackStrategy.attempt(&bob.engine, &input(&sealed, None, None)),
            DecodeAttempt::NotApplicable
        );
        assert!(matches!(
            SealedStrategy.attempt(&alice.engine, &input(&sealed, None, None)),
            DecodeAttempt::Failed(Error::DecryptionFailed(_))
        ));
    }
}
