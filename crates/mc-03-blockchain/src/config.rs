//! Chain configuration.

use serde::{Deserialize, Serialize};
use shared_types::Address;

/// Configuration for the chain ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Accounts whose blocks win equal-weight fork choice against external ones.
    #[serde(default)]
    pub local_addresses: Vec<Address>,
}

impl ChainConfig {
    /// Configuration for tests: no local accounts.
    pub fn for_testing() -> Self {
        Self::default()
    }

    pub fn with_local_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.local_addresses = addresses;
        self
    }
}
