//! Normalized liquidation records and the query that produces them.

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Graph subgraph (has USD values)
    Indexed,
    /// Direct `eth_getLogs` scan
    Scan,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Scan => "scan",
        }
    }
}

impl std::fmt::Display for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One liquidation, normalized across both sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationRecord {
    /// Unique id (`{tx_hash}-{log_index}` for scanned records)
    pub id: String,
    /// Transaction hash (0x-prefixed hex)
    pub tx_hash: String,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Liquidated borrower
    pub user: Address,
    /// Account that executed the liquidation
    pub liquidator: Address,
    pub collateral_symbol: String,
    /// Seized collateral, decimal-adjusted
    pub collateral_amount: f64,
    /// USD value of seized collateral (indexed source only)
    pub collateral_value_usd: Option<f64>,
    pub debt_symbol: String,
    /// Repaid debt, decimal-adjusted
    pub debt_amount: f64,
    /// USD value of repaid debt (indexed source only)
    pub debt_value_usd: Option<f64>,
    /// Explorer base URL of the network
    pub explorer_url: String,
    pub source: RecordSource,
}

impl LiquidationRecord {
    /// Explorer link for the transaction.
    pub fn tx_url(&self) -> String {
        format!("{}/tx/{}", self.explorer_url, self.tx_hash)
    }

    /// Explorer link for the liquidated user.
    pub fn user_url(&self) -> String {
        format!("{}/address/{:#x}", self.explorer_url, self.user)
    }

    /// Explorer link for the liquidator.
    pub fn liquidator_url(&self) -> String {
        format!("{}/address/{:#x}", self.explorer_url, self.liquidator)
    }
}

/// One search request from the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationQuery {
    /// Network registry key
    pub network: String,
    /// Inclusive lower bound (unix seconds)
    pub start: Option<u64>,
    /// Inclusive upper bound (unix seconds)
    pub end: Option<u64>,
    /// Only liquidations of this borrower
    pub user: Option<Address>,
    /// Only liquidations executed by this account
    pub liquidator: Option<Address>,
}

impl LiquidationQuery {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_user(mut self, user: Address) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_liquidator(mut self, liquidator: Address) -> Self {
        self.liquidator = Some(liquidator);
        self
    }

    /// Whether `timestamp` lies inside the requested window.
    pub fn contains(&self, timestamp: u64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

/// Scale a raw token amount down by `decimals`.
pub fn decimal_adjust(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or_else(|| {
            // Fall back to float math for decimals outside the unit table
            let raw = raw.to_string().parse::<f64>().unwrap_or(0.0);
            raw / 10_f64.powi(i32::from(decimals))
        })
}

/// Sort newest first; ties broken by id so output is deterministic.
pub fn sort_newest_first(records: &mut [LiquidationRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(id: &str, timestamp: u64) -> LiquidationRecord {
        LiquidationRecord {
            id: id.to_string(),
            tx_hash: format!("0x{id}"),
            timestamp,
            user: Address::ZERO,
            liquidator: Address::ZERO,
            collateral_symbol: "WETH".to_string(),
            collateral_amount: 1.0,
            collateral_value_usd: None,
            debt_symbol: "USDC".to_string(),
            debt_amount: 1.0,
            debt_value_usd: None,
            explorer_url: "https://etherscan.io".to_string(),
            source: RecordSource::Scan,
        }
    }

    #[test]
    fn test_decimal_adjust() {
        let one_eth = U256::from(10u128.pow(18));
        assert_eq!(decimal_adjust(one_eth, 18), 1.0);

        let usdc = U256::from(1_234_567_890u64); // 1234.56789 USDC
        assert!((decimal_adjust(usdc, 6) - 1234.56789).abs() < 1e-9);

        assert_eq!(decimal_adjust(U256::from(42u64), 0), 42.0);
        assert_eq!(decimal_adjust(U256::ZERO, 8), 0.0);
    }

    #[test]
    fn test_sort_newest_first() {
        let mut records = vec![record("b", 10), record("a", 30), record("c", 20), record("d", 30)];
        sort_newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "d", "c", "b"]);
    }

    #[test]
    fn test_query_window() {
        let q = LiquidationQuery::new("ethereum").between(Some(100), Some(200));
        assert!(q.contains(100));
        assert!(q.contains(200));
        assert!(!q.contains(99));
        assert!(!q.contains(201));
        assert!(LiquidationQuery::new("ethereum").contains(0));
    }

    #[test]
    fn test_explorer_links() {
        let mut r = record("x", 1);
        r.user = Address::repeat_byte(0xab);
        assert_eq!(r.tx_url(), "https://etherscan.io/tx/0xx");
        assert_eq!(
            r.user_url(),
            "https://etherscan.io/address/0xabababababababababababababababababababab"
        );
    }

    #[test]
    fn test_source_serialization() {
        assert_eq!(serde_json::to_string(&RecordSource::Indexed).unwrap(), "\"indexed\"");
        assert_eq!(RecordSource::Scan.to_string(), "scan");
    }
}
