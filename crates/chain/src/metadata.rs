//! Token metadata cache.

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rpc::LedgerRpc;

/// Decimals assumed for tokens that do not answer `decimals()`.
pub const FALLBACK_DECIMALS: u8 = 18;

/// Symbol and decimal precision of an ERC20 token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    /// Placeholder for non-standard or unresponsive token contracts:
    /// the first six characters of the checksummed address, 18 decimals.
    pub fn placeholder(token: Address) -> Self {
        let mut symbol = token.to_checksum(None);
        symbol.truncate(6);
        Self {
            symbol,
            decimals: FALLBACK_DECIMALS,
        }
    }
}

/// Process-lifetime token metadata cache.
///
/// Keyed by (chain id, token). Entries are never invalidated: a deployed
/// token's symbol and decimals do not change. Concurrent misses for the same
/// key may each hit the RPC; the values are identical so the last write wins.
#[derive(Debug, Default)]
pub struct TokenMetadataCache {
    entries: DashMap<(u64, Address), TokenMetadata>,
}

impl TokenMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry, if any.
    pub fn get(&self, chain_id: u64, token: Address) -> Option<TokenMetadata> {
        self.entries.get(&(chain_id, token)).map(|e| e.clone())
    }

    /// Resolve metadata for `token`, reading it from the chain on a miss.
    ///
    /// Never fails: unreadable tokens resolve to [`TokenMetadata::placeholder`].
    pub async fn resolve(&self, rpc: &dyn LedgerRpc, chain_id: u64, token: Address) -> TokenMetadata {
        if let Some(cached) = self.get(chain_id, token) {
            return cached;
        }

        let (symbol, decimals) = tokio::join!(rpc.token_symbol(token), rpc.token_decimals(token));

        let metadata = match (symbol, decimals) {
            (Ok(symbol), Ok(decimals)) => TokenMetadata { symbol, decimals },
            (symbol, decimals) => {
                let error = symbol.err().or(decimals.err());
                debug!(
                    chain_id = chain_id,
                    token = %token,
                    error = ?error,
                    "Token metadata unavailable, using placeholder"
                );
                TokenMetadata::placeholder(token)
            }
        };

        self.entries.insert((chain_id, token), metadata.clone());
        metadata
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
