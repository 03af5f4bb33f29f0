//! Ledger RPC seam.
//!
//! [`LedgerRpc`] is the narrow set of JSON-RPC reads the scan client needs.
//! [`AlloyLedger`] implements it over HTTP with Alloy typed providers.

use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, U256, U64};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::network::NetworkProfile;

sol! {
    /// ERC20 metadata subset
    #[sol(rpc)]
    interface IERC20Metadata {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    /// Aave V3 Pool liquidation event
    #[derive(Debug)]
    event LiquidationCall(
        address indexed collateralAsset,
        address indexed debtAsset,
        address indexed user,
        uint256 debtToCover,
        uint256 liquidatedCollateralAmount,
        address liquidator,
        bool receiveAToken
    );
}

/// Latest block number and its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub number: u64,
    pub timestamp: u64,
}

/// Decoded `LiquidationCall` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationEvent {
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub user: Address,
    pub debt_to_cover: U256,
    pub liquidated_collateral: U256,
    pub liquidator: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl LiquidationEvent {
    /// Decode a raw log; `None` for foreign or pending logs.
    pub fn from_log(log: &Log) -> Option<Self> {
        let decoded = log.log_decode::<LiquidationCall>().ok()?;
        let event = decoded.inner.data;

        Some(Self {
            collateral_asset: event.collateralAsset,
            debt_asset: event.debtAsset,
            user: event.user,
            debt_to_cover: event.debtToCover,
            liquidated_collateral: event.liquidatedCollateralAmount,
            liquidator: event.liquidator,
            block_number: log.block_number?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index.unwrap_or(0),
        })
    }
}

/// Read-only ledger calls used by the scan client.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Latest block number and timestamp.
    async fn head(&self) -> Result<ChainHead, LedgerError>;

    /// Timestamp of a block; `None` if the node does not know the block.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, LedgerError>;

    /// `LiquidationCall` events of `pool` in `[from, to]`, optionally
    /// restricted to one liquidated user (third indexed topic).
    async fn liquidation_events(
        &self,
        pool: Address,
        from: u64,
        to: u64,
        user: Option<Address>,
    ) -> Result<Vec<LiquidationEvent>, LedgerError>;

    /// ERC20 `symbol()`.
    async fn token_symbol(&self, token: Address) -> Result<String, LedgerError>;

    /// ERC20 `decimals()`.
    async fn token_decimals(&self, token: Address) -> Result<u8, LedgerError>;
}

/// Creates a [`LedgerRpc`] handle for a network.
pub trait LedgerConnector: Send + Sync {
    fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn LedgerRpc>, LedgerError>;
}

/// Connects to each profile's HTTP RPC endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl LedgerConnector for HttpConnector {
    fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn LedgerRpc>, LedgerError> {
        Ok(Arc::new(AlloyLedger::new(&profile.rpc_url)?))
    }
}

/// Minimal block header, decoded from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
struct BlockStamp {
    number: U64,
    timestamp: U64,
}

/// HTTP ledger client using Alloy providers.
#[derive(Debug, Clone)]
pub struct AlloyLedger {
    url: Url,
}

impl AlloyLedger {
    /// Create a client for an HTTP JSON-RPC endpoint.
    pub fn new(rpc_url: &str) -> Result<Self, LedgerError> {
        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| LedgerError::Transport(format!("invalid rpc url '{rpc_url}': {e}")))?;
        Ok(Self { url })
    }

    /// Get the endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.url.clone())
    }

    async fn block(&self, tag: BlockNumberOrTag) -> Result<Option<BlockStamp>, LedgerError> {
        let block = self
            .provider()
            .raw_request("eth_getBlockByNumber".into(), (tag, false))
            .await?;
        Ok(block)
    }
}

#[async_trait]
impl LedgerRpc for AlloyLedger {
    async fn head(&self) -> Result<ChainHead, LedgerError> {
        let block = self
            .block(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| LedgerError::Transport("node returned no latest block".to_string()))?;

        Ok(ChainHead {
            number: block.number.to::<u64>(),
            timestamp: block.timestamp.to::<u64>(),
        })
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, LedgerError> {
        let block = self.block(BlockNumberOrTag::Number(number)).await?;
        Ok(block.map(|b| b.timestamp.to::<u64>()))
    }

    async fn liquidation_events(
        &self,
        pool: Address,
        from: u64,
        to: u64,
        user: Option<Address>,
    ) -> Result<Vec<LiquidationEvent>, LedgerError> {
        let mut filter = Filter::new()
            .address(pool)
            .event_signature(LiquidationCall::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);
        if let Some(user) = user {
            filter = filter.topic3(user.into_word());
        }

        let logs = self.provider().get_logs(&filter).await?;
        let total = logs.len();

        let events: Vec<LiquidationEvent> =
            logs.iter().filter_map(LiquidationEvent::from_log).collect();
        if events.len() < total {
            warn!(
                skipped = total - events.len(),
                from = from,
                to = to,
                "Skipped undecodable LiquidationCall logs"
            );
        }

        debug!(from = from, to = to, events = events.len(), "Fetched liquidation logs");
        Ok(events)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, LedgerError> {
        let provider = self.provider();
        let contract = IERC20Metadata::new(token, &provider);
        let symbol = contract
            .symbol()
            .call()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(symbol._0)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, LedgerError> {
        let provider = self.provider();
        let contract = IERC20Metadata::new(token, &provider);
        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(decimals._0)
    }
}
