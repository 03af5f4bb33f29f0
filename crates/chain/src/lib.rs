//! Liquidation history chain layer.
//!
//! This crate provides:
//! - The network registry of Aave V3 deployments and their scan limits
//! - The normalized liquidation record and search query
//! - A narrow ledger RPC seam with an Alloy HTTP implementation
//! - A process-wide token metadata cache
//! - The chunked `eth_getLogs` scan client with adaptive range shrinking

mod error;
mod metadata;
mod network;
mod record;
mod rpc;
mod scan;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::LedgerError;
pub use metadata::{TokenMetadata, TokenMetadataCache, FALLBACK_DECIMALS};
pub use network::{
    NetworkOverride, NetworkProfile, NetworkRegistry, ProfileError, MAX_SCAN_CHUNKS,
};
pub use record::{
    decimal_adjust, sort_newest_first, LiquidationQuery, LiquidationRecord, RecordSource,
};
pub use rpc::{
    AlloyLedger, ChainHead, HttpConnector, LedgerConnector, LedgerRpc, LiquidationCall,
    LiquidationEvent,
};
pub use scan::{
    estimate_block, requested_span, BlockSpan, ScanClient, ScanCoverage, ScanOutcome,
    MAX_CONCURRENT_REQUESTS, MIN_CHUNK_SIZE,
};
