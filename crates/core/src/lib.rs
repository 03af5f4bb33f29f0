//! Liquidation history retrieval engine.
//!
//! [`LiquidationSearch`] answers one [`LiquidationQuery`] at a time: it
//! prefers the indexed service when a credential is configured and falls
//! back to a chunked ledger scan otherwise. [`EngineConfig`] wires both
//! clients from a TOML file and the environment.

mod config;
mod search;

pub use config::{EngineConfig, IndexedConfig, ScanConfig, API_KEY_VAR, CONFIG_PATH_VAR};
pub use search::{IndexedAttempt, LiquidationSearch, RetrievalResult, SearchError, SearchReport};

pub use liqtrace_chain::{LiquidationQuery, LiquidationRecord, NetworkRegistry, RecordSource};
