use crate::{ConversationId, ConversationKeys, Error, MessageId};
use chrono::{DateTime, Utc};
use prost::Message;
use zeroize::Zeroize;

const SCHEMA_VERSION: u32 = 1;

/// Persisted key material for one conversation.
#[derive(Clone, PartialEq, Message)]
pub struct KeyRecordProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(string, tag = "2")]
    pub conversation_id: String,
    /// Ed25519 secret followed by X25519 secret.
    #[prost(bytes = "vec", tag = "3")]
    pub secrets: Vec<u8>,
    #[prost(int64, tag = "4")]
    pub created_at: i64,
}

/// Locally cached plaintext of a message this client sent.
#[derive(Clone, PartialEq, Message)]
pub struct PlaintextRecordProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(string, tag = "2")]
    pub message_id: String,
    #[prost(string, tag = "3")]
    pub conversation_id: String,
    #[prost(string, tag = "4")]
    pub text: String,
    #[prost(int64, tag = "5")]
    pub created_at: i64,
}

/// A decoded key record.
pub struct LocalKeyRecord {
    /// Conversation the keys belong to.
    pub conversation_id: ConversationId,
    /// The key material itself.
    pub keys: ConversationKeys,
    /// When the keys were generated.
    pub created_at: DateTime<Utc>,
}

impl LocalKeyRecord {
    /// Encode to the protobuf layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut secrets = self.keys.to_bytes();
        let mut proto = KeyRecordProto {
            version: SCHEMA_VERSION,
            conversation_id: self.conversation_id.to_string(),
            secrets: secrets.to_vec(),
            created_at: self.created_at.timestamp(),
        };
        secrets.zeroize();

        let buf = proto.encode_to_vec();
        proto.secrets.zeroize();
        buf
    }

    /// Decode from the protobuf layout, rejecting anything malformed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = KeyRecordProto::decode(bytes)?;

        if proto.version != SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "Unsupported key record version: {}",
                proto.version
            )));
        }

        if proto.secrets.len() != 64 {
            proto.secrets.zeroize();
            return Err(Error::Storage("Invalid key material length".to_string()));
        }

        let mut secrets = [0u8; 64];
        secrets.copy_from_slice(&proto.secrets);
        proto.secrets.zeroize();
        let keys = ConversationKeys::from(secrets);
        secrets.zeroize();

        Ok(Self {
            conversation_id: parse_uuid(&proto.conversation_id)?.into(),
            keys,
            created_at: parse_timestamp(proto.created_at)?,
        })
    }
}

/// A decoded plaintext cache record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalPlaintextRecord {
    /// The message this plaintext belongs to.
    pub message_id: MessageId,
    /// Its conversation.
    pub conversation_id: ConversationId,
    /// What the user typed.
    pub text: String,
    /// When it was cached.
    pub created_at: DateTime<Utc>,
}

impl LocalPlaintextRecord {
    /// Encode to the protobuf layout.
    pub fn serialize(&self) -> Vec<u8> {
        PlaintextRecordProto {
            version: SCHEMA_VERSION,
            message_id: self.message_id.to_string(),
            conversation_id: self.conversation_id.to_string(),
            text: self.text.clone(),
            created_at: self.created_at.timestamp(),
        }
        .encode_to_vec()
    }

    /// Decode from the protobuf layout.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = PlaintextRecordProto::decode(bytes)?;

        if proto.version != SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "Unsupported plaintext record version: {}",
                proto.version
            )));
        }

        Ok(Self {
            message_id: parse_uuid(&proto.message_id)?.into(),
            conversation_id: parse_uuid(&proto.conversation_id)?.into(),
            text: proto.text,
            created_at: parse_timestamp(proto.created_at)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<uuid::Uuid, Error> {
    uuid::Uuid::parse_str(value).map_err(|err| Error::Storage(format!("Invalid id: {err}")))
}

fn parse_timestamp(secs: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Storage(format!("Invalid timestamp: {secs}")))
}
