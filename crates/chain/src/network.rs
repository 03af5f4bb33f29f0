//! Network profile registry.
//!
//! Static per-network parameters for every supported Aave V3 deployment:
//! pool address, explorer, subgraph id and the ledger scan limits used by
//! the [`ScanClient`](crate::ScanClient).

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default ceiling on successful chunk queries per ledger scan.
pub const MAX_SCAN_CHUNKS: u32 = 40;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Errors raised while building or overriding a profile.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("network '{network}': max_log_range must be > 0")]
    InvalidLogRange { network: String },

    #[error("network '{network}': avg_block_time must be > 0 (got {value})")]
    InvalidBlockTime { network: String, value: f64 },

    #[error("network '{network}': missing required field '{field}'")]
    MissingField {
        network: String,
        field: &'static str,
    },
}

/// Immutable parameters of one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Registry key (e.g., "ethereum")
    pub key: String,
    /// Human-readable name
    pub name: String,
    /// EVM chain ID
    pub chain_id: u64,
    /// Lending pool contract emitting `LiquidationCall`
    pub pool: Address,
    /// Graph subgraph id; `None` disables indexed queries for this network
    pub subgraph_id: Option<String>,
    /// HTTP JSON-RPC endpoint
    pub rpc_url: String,
    /// Block explorer base URL (no trailing slash)
    pub explorer_url: String,
    /// Pool deployment block, used when a query has no start timestamp
    pub start_block: u64,
    /// Average block interval in seconds
    pub avg_block_time: f64,
    /// Largest block span accepted by one `eth_getLogs` call
    pub max_log_range: u64,
}

impl NetworkProfile {
    #[allow(clippy::too_many_arguments)]
    fn builtin(
        key: &str,
        name: &str,
        chain_id: u64,
        pool: Address,
        subgraph_id: Option<&str>,
        rpc_url: &str,
        explorer_url: &str,
        start_block: u64,
        avg_block_time: f64,
        max_log_range: u64,
    ) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            chain_id,
            pool,
            subgraph_id: subgraph_id.map(str::to_string),
            rpc_url: rpc_url.to_string(),
            explorer_url: explorer_url.to_string(),
            start_block,
            avg_block_time,
            max_log_range,
        }
    }

    /// Check the scan-limit invariants.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.max_log_range == 0 {
            return Err(ProfileError::InvalidLogRange {
                network: self.key.clone(),
            });
        }
        if !(self.avg_block_time.is_finite() && self.avg_block_time > 0.0) {
            return Err(ProfileError::InvalidBlockTime {
                network: self.key.clone(),
                value: self.avg_block_time,
            });
        }
        Ok(())
    }

    /// Whether an indexed (subgraph) query is possible at all.
    pub fn has_indexed_service(&self) -> bool {
        self.subgraph_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Largest window (days) a ledger scan covers without going partial.
    pub fn max_date_range_days(&self, max_chunks: u32) -> f64 {
        self.max_log_range as f64 * f64::from(max_chunks) * self.avg_block_time / SECONDS_PER_DAY
    }

    /// Apply an override on top of this profile.
    pub fn apply(&mut self, over: &NetworkOverride) {
        if let Some(name) = &over.name {
            self.name = name.clone();
        }
        if let Some(chain_id) = over.chain_id {
            self.chain_id = chain_id;
        }
        if let Some(pool) = over.pool {
            self.pool = pool;
        }
        if let Some(subgraph_id) = &over.subgraph_id {
            // Empty string in config explicitly disables the subgraph
            self.subgraph_id = (!subgraph_id.is_empty()).then(|| subgraph_id.clone());
        }
        if let Some(rpc_url) = &over.rpc_url {
            self.rpc_url = rpc_url.clone();
        }
        if let Some(explorer_url) = &over.explorer_url {
            self.explorer_url = explorer_url.trim_end_matches('/').to_string();
        }
        if let Some(start_block) = over.start_block {
            self.start_block = start_block;
        }
        if let Some(avg_block_time) = over.avg_block_time {
            self.avg_block_time = avg_block_time;
        }
        if let Some(max_log_range) = over.max_log_range {
            self.max_log_range = max_log_range;
        }
    }
}

/// Partial profile as read from configuration.
///
/// For a built-in network every field is optional. A key that is not built
/// in must provide everything except `name` and `subgraph_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub pool: Option<Address>,
    #[serde(default)]
    pub subgraph_id: Option<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub avg_block_time: Option<f64>,
    #[serde(default)]
    pub max_log_range: Option<u64>,
}

impl NetworkOverride {
    /// Build a complete profile for a network with no built-in entry.
    fn into_profile(self, key: &str) -> Result<NetworkProfile, ProfileError> {
        let missing = |field| ProfileError::MissingField {
            network: key.to_string(),
            field,
        };

        let profile = NetworkProfile {
            key: key.to_string(),
            name: self.name.unwrap_or_else(|| key.to_string()),
            chain_id: self.chain_id.ok_or_else(|| missing("chain_id"))?,
            pool: self.pool.ok_or_else(|| missing("pool"))?,
            subgraph_id: self.subgraph_id.filter(|id| !id.is_empty()),
            rpc_url: self.rpc_url.ok_or_else(|| missing("rpc_url"))?,
            explorer_url: self
                .explorer_url
                .ok_or_else(|| missing("explorer_url"))?
                .trim_end_matches('/')
                .to_string(),
            start_block: self.start_block.ok_or_else(|| missing("start_block"))?,
            avg_block_time: self.avg_block_time.ok_or_else(|| missing("avg_block_time"))?,
            max_log_range: self.max_log_range.ok_or_else(|| missing("max_log_range"))?,
        };
        profile.validate()?;
        Ok(profile)
    }
}

/// Lookup table of network profiles keyed by network key.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    /// Profiles in registration order
    profiles: Vec<NetworkProfile>,
    /// Key to position in `profiles`
    index: HashMap<String, usize>,
    /// Chunk ceiling used for date-range advice
    max_chunks: u32,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl NetworkRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            profiles: Vec::new(),
            index: HashMap::new(),
            max_chunks: MAX_SCAN_CHUNKS,
        }
    }

    /// Registry with every built-in Aave V3 deployment.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for profile in builtin_profiles() {
            registry.insert(profile);
        }
        registry
    }

    /// Set the chunk ceiling used by [`Self::max_date_range_days`].
    pub fn with_max_chunks(mut self, max_chunks: u32) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    /// Apply configuration overrides, adding unknown keys as new networks.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Result<Self, ProfileError>
    where
        I: IntoIterator<Item = (&'a String, &'a NetworkOverride)>,
    {
        for (key, over) in overrides {
            match self.index.get(key.as_str()) {
                Some(&pos) => {
                    let profile = &mut self.profiles[pos];
                    profile.apply(over);
                    profile.validate()?;
                }
                None => {
                    let profile = over.clone().into_profile(key)?;
                    self.insert(profile);
                }
            }
        }
        Ok(self)
    }

    /// Register (or replace) a profile.
    pub fn insert(&mut self, profile: NetworkProfile) {
        match self.index.get(&profile.key) {
            Some(&pos) => self.profiles[pos] = profile,
            None => {
                self.index.insert(profile.key.clone(), self.profiles.len());
                self.profiles.push(profile);
            }
        }
    }

    /// Look up a profile by key.
    pub fn profile(&self, key: &str) -> Option<&NetworkProfile> {
        self.index.get(key).map(|&pos| &self.profiles[pos])
    }

    /// Largest date window (days) a scan of `key` covers in one pass.
    ///
    /// Advisory only: the scan client tolerates and reports larger windows.
    pub fn max_date_range_days(&self, key: &str) -> Option<f64> {
        self.profile(key)
            .map(|p| p.max_date_range_days(self.max_chunks))
    }

    /// Chunk ceiling this registry advises with.
    pub fn max_chunks(&self) -> u32 {
        self.max_chunks
    }

    /// Network keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.key.as_str())
    }

    /// All profiles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ============================================================================
// Built-in networks
// ============================================================================

const POOL_L2_DEFAULT: Address = address!("794a61358D6845594F94dc1DB02A252b5b4814aD");

fn builtin_profiles() -> Vec<NetworkProfile> {
    vec![
        NetworkProfile::builtin(
            "ethereum",
            "Ethereum",
            1,
            address!("87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"),
            Some("Cd2gEDVeqnjBn1hSeqFMitw8Q1iiyV9FYUZkLNRcL87g"),
            "https://eth.drpc.org",
            "https://etherscan.io",
            16_291_127,
            12.0,
            10_000,
        ),
        NetworkProfile::builtin(
            "arbitrum",
            "Arbitrum",
            42161,
            POOL_L2_DEFAULT,
            Some("DLuE98kEb5pQNXAcKFQGQgfSQ57Xdou4jnVbAEqMfy3B"),
            "https://arbitrum-one-rpc.publicnode.com",
            "https://arbiscan.io",
            7_742_429,
            0.25,
            10_000,
        ),
        NetworkProfile::builtin(
            "polygon",
            "Polygon",
            137,
            POOL_L2_DEFAULT,
            Some("Co2URyXjnxaw8WqxKyVHdirq9Ahhm5vcTs4dMedAq211"),
            "https://polygon-bor-rpc.publicnode.com",
            "https://polygonscan.com",
            25_826_028,
            2.0,
            50_000,
        ),
        NetworkProfile::builtin(
            "optimism",
            "Optimism",
            10,
            POOL_L2_DEFAULT,
            Some("DSfLz8oQBUeU5atALgUFQKMTSYV9mZAVYp4noLSXAfvb"),
            "https://optimism-rpc.publicnode.com",
            "https://optimistic.etherscan.io",
            4_365_693,
            2.0,
            5_000,
        ),
        NetworkProfile::builtin(
            "avalanche",
            "Avalanche",
            43114,
            POOL_L2_DEFAULT,
            Some("2h9woxy8RTjHu1HJsCEnmzpPHFArU33avmUh4f71JpVn"),
            "https://avalanche-c-chain-rpc.publicnode.com",
            "https://snowtrace.io",
            11_970_506,
            2.0,
            2_048,
        ),
        NetworkProfile::builtin(
            "base",
            "Base",
            8453,
            address!("A238Dd80C259a72e81d7e4664a9801593F98d1c5"),
            Some("GQFbb95cE6d8mV989mL5figjaGaKCQB3xqYrr1bRyXqF"),
            "https://base-rpc.publicnode.com",
            "https://basescan.org",
            2_357_440,
            2.0,
            5_000,
        ),
        NetworkProfile::builtin(
            "bnb",
            "BNB Chain",
            56,
            address!("6807dc923806fE8Fd134338EABCA509979a7e0cB"),
            Some("7Jk85XgkV1MQ7u56hD8rr65rfASbayJXopugWkUoBMnZ"),
            "https://bsc-rpc.publicnode.com",
            "https://bscscan.com",
            29_136_492,
            3.0,
            5_000,
        ),
        NetworkProfile::builtin(
            "gnosis",
            "Gnosis",
            100,
            address!("b50201558B00496A145fE76f7424749556E326D8"),
            Some("HtcDaL8L8iZ2KQNNS44EBVmLruzxuNAz1RkBYdui1QUT"),
            "https://gnosis-rpc.publicnode.com",
            "https://gnosisscan.io",
            27_150_000,
            5.0,
            50_000,
        ),
        NetworkProfile::builtin(
            "scroll",
            "Scroll",
            534352,
            address!("11fCfe756c05AD438e312a7fd934381537D3cFfe"),
            Some("74JwenoHZb2aAYVGCCSdPWzi9mm745dyHyQQVoZ7Sbub"),
            "https://scroll-rpc.publicnode.com",
            "https://scrollscan.com",
            4_500_000,
            3.0,
            50_000,
        ),
        NetworkProfile::builtin(
            "zksync",
            "zkSync Era",
            324,
            address!("78e30497a3c7527d953c6B1E3541b021A98Ac43c"),
            Some("ENYSc8G3WvrbhWH8UZHrqPWYRcuyCaNmaTmoVp7uzabM"),
            "https://mainnet.era.zksync.io",
            "https://era.zksync.network",
            37_248_000,
            1.0,
            10_000_000,
        ),
        NetworkProfile::builtin(
            "linea",
            "Linea",
            59144,
            address!("c47b8C00b0f69a36fa203Ffeac0334874574a8Ac"),
            Some("Gz2kjnmRV1fQj3R8cssoZa5y9VTanhrDo4Mh7nWW1wHa"),
            "https://rpc.linea.build",
            "https://lineascan.build",
            12_500_000,
            2.0,
            10_000_000,
        ),
        // Metis is served by a self-hosted graph node, not the gateway
        NetworkProfile::builtin(
            "metis",
            "Metis",
            1088,
            address!("90df02551bB792286e8D4f13E0e357b4Bf1D6a57"),
            None,
            "https://metis-rpc.publicnode.com",
            "https://explorer.metis.io",
            5_765_988,
            4.0,
            50_000,
        ),
    ]
}
