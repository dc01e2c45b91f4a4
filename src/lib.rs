mod types;
pub use types::*;

mod error;
pub use error::Error;

mod config;
pub use config::{ClientConfig, RelayConfig};

mod keys;
pub use keys::*;

pub mod store;

mod model;
pub use model::*;

mod delivery;
pub use delivery::*;

mod cipher;
pub use cipher::*;

mod transport;
pub use transport::*;

mod exchange;
pub use exchange::*;

mod relay;
pub use relay::*;

mod client;
pub use client::*;
