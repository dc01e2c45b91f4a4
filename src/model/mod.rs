mod conversation;
pub(crate) use conversation::decode_verifying_key;
pub use conversation::*;
mod message;
pub use message::*;
