//! blockforge
//!
//! Block production and peer housekeeping for a proof-of-work or
//! proof-of-stake full node:
//! - A cancellable mining loop that searches nonces over block templates
//!   and submits solutions to the consensus manager
//! - Per-connection behaviors enforcing the minimum protocol version and
//!   probing liveness with ping/pong
//! - An in-memory development chain and peer for exercising both

pub mod chain;
pub mod config;
pub mod crypto;
pub mod devnet;
pub mod error;
pub mod logging;
pub mod miner;
pub mod peer;
pub mod settings;
pub mod types;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "blockforge";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
