//! Engine configuration.
//!
//! Everything has a working default: an empty file (or no file) yields the
//! built-in networks, the public gateway and no indexed-service credential.
//!
//! ```toml
//! [indexed]
//! api_key = "${GRAPH_API_KEY}"
//!
//! [scan]
//! max_chunks = 60
//!
//! [networks.ethereum]
//! rpc_url = "https://eth-mainnet.g.alchemy.com/v2/${ALCHEMY_KEY}"
//! max_log_range = 2000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use liqtrace_api::{DEFAULT_GATEWAY_URL, DEFAULT_MAX_SKIP, DEFAULT_PAGE_SIZE};
use liqtrace_chain::{
    NetworkOverride, NetworkRegistry, ProfileError, MAX_CONCURRENT_REQUESTS, MAX_SCAN_CHUNKS,
    MIN_CHUNK_SIZE,
};
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Selects a configuration file.
pub const CONFIG_PATH_VAR: &str = "LIQTRACE_CONFIG";

/// Overrides `indexed.api_key`.
pub const API_KEY_VAR: &str = "GRAPH_API_KEY";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Indexed query service
    #[serde(default)]
    pub indexed: IndexedConfig,

    /// Ledger scan limits
    #[serde(default)]
    pub scan: ScanConfig,

    /// Per-network overrides; unknown keys add networks
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkOverride>,
}

/// Indexed query service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Gateway API key; absent means the indexed attempt is skipped
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Offset ceiling enforced by the gateway
    #[serde(default = "default_max_skip")]
    pub max_skip: usize,
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_skip() -> usize {
    DEFAULT_MAX_SKIP
}

impl Default for IndexedConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            api_key: None,
            page_size: default_page_size(),
            max_skip: default_max_skip(),
        }
    }
}

/// Ledger scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Successful chunk queries per scan
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,

    /// Floor for the adaptive chunk shrink
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,

    /// Metadata and timestamp requests in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_chunks() -> u32 {
    MAX_SCAN_CHUNKS
}

fn default_min_chunk_size() -> u64 {
    MIN_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    MAX_CONCURRENT_REQUESTS
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            min_chunk_size: default_min_chunk_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file and expand `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.expand_env_vars();
        Ok(config)
    }

    /// Load from `LIQTRACE_CONFIG` if set, else defaults; `GRAPH_API_KEY`
    /// takes precedence over the file's credential.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        Ok(config.with_api_key(std::env::var(API_KEY_VAR).ok()))
    }

    /// Replace the credential when `api_key` is non-blank.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.indexed.api_key = Some(key);
        }
        self
    }

    /// Credential for the indexed service, if one is usable. A key still
    /// holding an unexpanded `${VAR}` counts as absent.
    pub fn credential(&self) -> Option<&str> {
        self.indexed
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.contains("${"))
    }

    /// Built-in networks with this configuration's overrides applied.
    pub fn registry(&self) -> Result<NetworkRegistry, ProfileError> {
        NetworkRegistry::builtin()
            .with_max_chunks(self.scan.max_chunks)
            .with_overrides(&self.networks)
    }

    /// Expand environment variables in string values.
    pub fn expand_env_vars(&mut self) {
        self.indexed.gateway_url = expand_env(&self.indexed.gateway_url);
        if let Some(ref mut key) = self.indexed.api_key {
            *key = expand_env(key);
        }
        for over in self.networks.values_mut() {
            if let Some(ref mut rpc_url) = over.rpc_url {
                *rpc_url = expand_env(rpc_url);
            }
            if let Some(ref mut subgraph_id) = over.subgraph_id {
                *subgraph_id = expand_env(subgraph_id);
            }
        }
    }

    /// Log the effective configuration. The credential itself is never logged.
    pub fn log_config(&self) {
        tracing::info!(
            gateway = %self.indexed.gateway_url,
            credential = if self.credential().is_some() { "present" } else { "absent" },
            page_size = self.indexed.page_size,
            max_skip = self.indexed.max_skip,
            "Indexed service configuration"
        );
        tracing::info!(
            max_chunks = self.scan.max_chunks,
            min_chunk_size = self.scan.min_chunk_size,
            max_concurrent = self.scan.max_concurrent,
            "Ledger scan limits"
        );
        for key in self.networks.keys() {
            tracing::info!(network = %key, "Network override");
        }
    }
}

/// Expand `${VAR_NAME}` patterns; unset variables are left as written.
fn expand_env(s: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.indexed.gateway_url, "https://gateway.thegraph.com/api");
        assert_eq!(config.indexed.page_size, 1_000);
        assert_eq!(config.indexed.max_skip, 5_000);
        assert_eq!(config.scan.max_chunks, 40);
        assert_eq!(config.scan.min_chunk_size, 500);
        assert_eq!(config.scan.max_concurrent, 8);
        assert!(config.credential().is_none());
        assert_eq!(config.registry().unwrap().len(), 12);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.scan.max_chunks, 40);
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_parse_overrides() {
        let config: EngineConfig = toml::from_str(
            r#"
            [indexed]
            api_key = "abc"
            page_size = 500

            [scan]
            max_chunks = 80

            [networks.ethereum]
            rpc_url = "https://rpc.example"
            max_log_range = 2000

            [networks.devnet]
            name = "Devnet"
            chain_id = 31337
            pool = "0x0000000000000000000000000000000000000001"
            rpc_url = "http://localhost:8545"
            explorer_url = "http://localhost:4000"
            start_block = 0
            avg_block_time = 1.0
            max_log_range = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.credential(), Some("abc"));
        assert_eq!(config.indexed.page_size, 500);
        assert_eq!(config.indexed.max_skip, 5_000);

        let registry = config.registry().unwrap();
        assert_eq!(registry.max_chunks(), 80);
        let eth = registry.profile("ethereum").unwrap();
        assert_eq!(eth.rpc_url, "https://rpc.example");
        assert_eq!(eth.max_log_range, 2_000);
        let devnet = registry.profile("devnet").unwrap();
        assert_eq!(devnet.chain_id, 31_337);
        assert!(!devnet.has_indexed_service());
    }

    #[test]
    fn test_invalid_override_names_network() {
        let config: EngineConfig = toml::from_str(
            r#"
            [networks.base]
            max_log_range = 0
            "#,
        )
        .unwrap();
        let err = config.registry().unwrap_err();
        assert!(err.to_string().contains("base"));
    }

    #[test]
    fn test_credential_precedence() {
        let config = EngineConfig {
            indexed: IndexedConfig {
                api_key: Some("from-file".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let kept = config.clone().with_api_key(Some("  ".to_string()));
        assert_eq!(kept.credential(), Some("from-file"));

        let replaced = config.with_api_key(Some("from-env".to_string()));
        assert_eq!(replaced.credential(), Some("from-env"));

        let blank = EngineConfig::default().with_api_key(None);
        assert!(blank.credential().is_none());
    }

    #[test]
    fn test_expand_env() {
        // Unique var names, tests run in parallel
        std::env::set_var("LIQTRACE_TEST_KEY", "secret");
        assert_eq!(expand_env("${LIQTRACE_TEST_KEY}"), "secret");
        assert_eq!(
            expand_env("https://rpc/${LIQTRACE_TEST_KEY}/v2"),
            "https://rpc/secret/v2"
        );
        assert_eq!(expand_env("${LIQTRACE_TEST_UNSET}"), "${LIQTRACE_TEST_UNSET}");
        assert_eq!(expand_env("no_vars"), "no_vars");
        std::env::remove_var("LIQTRACE_TEST_KEY");
    }

    #[test]
    fn test_from_file() {
        std::env::set_var("LIQTRACE_TEST_RPC", "https://polygon.example");
        let path = std::env::temp_dir().join(format!("liqtrace-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[networks.polygon]\nrpc_url = \"${{LIQTRACE_TEST_RPC}}\"").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(
            config.networks["polygon"].rpc_url.as_deref(),
            Some("https://polygon.example")
        );

        std::fs::remove_file(&path).unwrap();
        std::env::remove_var("LIQTRACE_TEST_RPC");
        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_unexpanded_key_is_absent() {
        let path = std::env::temp_dir().join(format!("liqtrace-key-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[indexed]\napi_key = \"${{LIQTRACE_TEST_UNSET_KEY}}\"").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.indexed.api_key.as_deref(), Some("${LIQTRACE_TEST_UNSET_KEY}"));
        assert!(config.credential().is_none());

        // The environment still supplies one
        let config = config.with_api_key(Some("from-env".to_string()));
        assert_eq!(config.credential(), Some("from-env"));
    }
}
