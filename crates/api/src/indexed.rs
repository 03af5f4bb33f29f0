//! The Graph client for the Aave V3 liquidation subgraphs.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use liqtrace_chain::{decimal_adjust, LiquidationQuery, LiquidationRecord, NetworkProfile, RecordSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Decentralized gateway base URL.
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.thegraph.com/api";

/// Rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// The gateway rejects `skip` beyond this.
pub const DEFAULT_MAX_SKIP: usize = 5000;

/// Decimals assumed when a reserve does not report any.
const DEFAULT_RESERVE_DECIMALS: u8 = 18;

const LIQUIDATION_QUERY: &str = r#"
query GetLiquidations($first: Int!, $skip: Int!, $where: LiquidationCall_filter, $orderBy: LiquidationCall_orderBy, $orderDirection: OrderDirection) {
  liquidationCalls(
    first: $first
    skip: $skip
    where: $where
    orderBy: $orderBy
    orderDirection: $orderDirection
  ) {
    id
    txHash
    timestamp
    user { id }
    liquidator
    collateralReserve { symbol decimals }
    principalReserve { symbol decimals }
    collateralAmount
    principalAmount
    collateralAssetPriceUSD
    borrowAssetPriceUSD
  }
}
"#;

/// Indexed retrieval failure. Always recoverable by a ledger scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexedError {
    /// No subgraph for the network or no API key configured
    #[error("no indexed service available for '{0}'")]
    NoCredential(String),

    /// Transport, status, payload or GraphQL failure
    #[error("indexed service failure: {0}")]
    Service(String),
}

impl From<reqwest::Error> for IndexedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Service(err.to_string())
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// `LiquidationCall_filter` subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiquidationFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_gte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_lte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidator: Option<String>,
}

impl LiquidationFilter {
    /// Filter for a query; addresses lower-cased as the subgraph stores them.
    pub fn from_query(query: &LiquidationQuery) -> Self {
        Self {
            timestamp_gte: query.start.map(|ts| ts.to_string()),
            timestamp_lte: query.end.map(|ts| ts.to_string()),
            user: query.user.map(|a| format!("{a:#x}")),
            liquidator: query.liquidator.map(|a| format!("{a:#x}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVariables {
    pub first: usize,
    pub skip: usize,
    #[serde(rename = "where")]
    pub filter: LiquidationFilter,
    pub order_by: &'static str,
    pub order_direction: &'static str,
}

/// GraphQL POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRequest {
    pub query: &'static str,
    pub variables: PageVariables,
}

impl GraphRequest {
    /// One page, newest first.
    pub fn page(filter: LiquidationFilter, first: usize, skip: usize) -> Self {
        Self {
            query: LIQUIDATION_QUERY,
            variables: PageVariables {
                first,
                skip,
                filter,
                order_by: "timestamp",
                order_direction: "desc",
            },
        }
    }
}

/// GraphQL response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphResponse {
    #[serde(default)]
    pub data: Option<LiquidationPage>,
    #[serde(default)]
    pub errors: Option<Vec<GraphErrorMessage>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationPage {
    #[serde(default)]
    pub liquidation_calls: Vec<SubgraphLiquidation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountRef {
    #[serde(deserialize_with = "deserialize_address")]
    pub id: Address,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReserveRef {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u8")]
    pub decimals: Option<u8>,
}

/// One `liquidationCalls` row as the subgraph returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphLiquidation {
    pub id: String,
    pub tx_hash: String,
    #[serde(deserialize_with = "deserialize_u64")]
    pub timestamp: u64,
    #[serde(default)]
    pub user: Option<AccountRef>,
    #[serde(default, deserialize_with = "deserialize_optional_address")]
    pub liquidator: Option<Address>,
    #[serde(default)]
    pub collateral_reserve: Option<ReserveRef>,
    #[serde(default)]
    pub principal_reserve: Option<ReserveRef>,
    #[serde(deserialize_with = "deserialize_u256")]
    pub collateral_amount: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub principal_amount: U256,
    #[serde(rename = "collateralAssetPriceUSD", default, deserialize_with = "deserialize_optional_f64")]
    pub collateral_asset_price_usd: Option<f64>,
    #[serde(rename = "borrowAssetPriceUSD", default, deserialize_with = "deserialize_optional_f64")]
    pub borrow_asset_price_usd: Option<f64>,
}

impl SubgraphLiquidation {
    /// Convert to a [`LiquidationRecord`].
    ///
    /// Missing reserve data falls back to `"Unknown"` / 18 decimals and a
    /// missing price to zero.
    pub fn normalize(self, explorer_url: &str) -> LiquidationRecord {
        let (collateral_symbol, collateral_decimals) = reserve_or_unknown(self.collateral_reserve);
        let (debt_symbol, debt_decimals) = reserve_or_unknown(self.principal_reserve);

        let collateral_amount = decimal_adjust(self.collateral_amount, collateral_decimals);
        let debt_amount = decimal_adjust(self.principal_amount, debt_decimals);

        LiquidationRecord {
            id: self.id,
            tx_hash: self.tx_hash,
            timestamp: self.timestamp,
            user: self.user.map(|u| u.id).unwrap_or_default(),
            liquidator: self.liquidator.unwrap_or_default(),
            collateral_symbol,
            collateral_amount,
            collateral_value_usd: Some(collateral_amount * self.collateral_asset_price_usd.unwrap_or(0.0)),
            debt_symbol,
            debt_amount,
            debt_value_usd: Some(debt_amount * self.borrow_asset_price_usd.unwrap_or(0.0)),
            explorer_url: explorer_url.to_string(),
            source: RecordSource::Indexed,
        }
    }
}

fn reserve_or_unknown(reserve: Option<ReserveRef>) -> (String, u8) {
    let reserve = reserve.unwrap_or_default();
    (
        reserve.symbol.unwrap_or_else(|| "Unknown".to_string()),
        reserve.decimals.unwrap_or(DEFAULT_RESERVE_DECIMALS),
    )
}

// ============================================================================
// Transport
// ============================================================================

/// Posts GraphQL requests.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    async fn post(&self, url: &str, request: &GraphRequest) -> Result<GraphResponse, IndexedError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpGraphTransport {
    client: reqwest::Client,
}

impl HttpGraphTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GraphTransport for HttpGraphTransport {
    async fn post(&self, url: &str, request: &GraphRequest) -> Result<GraphResponse, IndexedError> {
        let response = self.client.post(url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexedError::Service(format!(
                "subgraph request failed ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Paged subgraph client.
#[derive(Clone)]
pub struct IndexedClient {
    transport: Arc<dyn GraphTransport>,
    gateway_url: String,
    page_size: usize,
    max_skip: usize,
}

impl std::fmt::Debug for IndexedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedClient")
            .field("gateway_url", &self.gateway_url)
            .field("page_size", &self.page_size)
            .field("max_skip", &self.max_skip)
            .finish()
    }
}

impl Default for IndexedClient {
    fn default() -> Self {
        Self::new(Arc::new(HttpGraphTransport::new()))
    }
}

impl IndexedClient {
    /// Create a client over `transport` with the gateway defaults.
    pub fn new(transport: Arc<dyn GraphTransport>) -> Self {
        Self {
            transport,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_skip: DEFAULT_MAX_SKIP,
        }
    }

    pub fn with_gateway_url(mut self, gateway_url: impl Into<String>) -> Self {
        self.gateway_url = gateway_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_skip(mut self, max_skip: usize) -> Self {
        self.max_skip = max_skip;
        self
    }

    /// Subgraph endpoint, if the network has one and a credential is set.
    pub fn endpoint(&self, profile: &NetworkProfile, credential: Option<&str>) -> Option<String> {
        let subgraph_id = profile.subgraph_id.as_deref()?;
        let api_key = credential.map(str::trim).filter(|k| !k.is_empty())?;
        Some(format!("{}/{api_key}/subgraphs/id/{subgraph_id}", self.gateway_url))
    }

    /// Fetch every matching liquidation, newest first.
    ///
    /// Pages are requested sequentially and stop at the first short page or
    /// once the offset reaches `max_skip`; rows beyond that are silently
    /// dropped.
    #[instrument(skip(self, profile, query, credential), fields(network = %profile.key))]
    pub async fn fetch(
        &self,
        profile: &NetworkProfile,
        query: &LiquidationQuery,
        credential: Option<&str>,
    ) -> Result<Vec<LiquidationRecord>, IndexedError> {
        let url = self
            .endpoint(profile, credential)
            .ok_or_else(|| IndexedError::NoCredential(profile.key.clone()))?;

        let filter = LiquidationFilter::from_query(query);
        let mut records = Vec::new();
        let mut skip = 0;

        loop {
            let request = GraphRequest::page(filter.clone(), self.page_size, skip);
            let response = self.transport.post(&url, &request).await?;

            if let Some(error) = response.errors.and_then(|errors| errors.into_iter().next()) {
                return Err(IndexedError::Service(format!(
                    "subgraph query error: {}",
                    error.message
                )));
            }

            let rows = response.data.unwrap_or_default().liquidation_calls;
            let fetched = rows.len();
            records.extend(rows.into_iter().map(|row| row.normalize(&profile.explorer_url)));

            debug!(skip = skip, fetched = fetched, total = records.len(), "Fetched subgraph page");

            if fetched < self.page_size {
                break;
            }
            skip += self.page_size;
            if skip >= self.max_skip {
                warn!(
                    records = records.len(),
                    max_skip = self.max_skip,
                    "Subgraph offset ceiling reached, results truncated"
                );
                break;
            }
        }

        info!(records = records.len(), "Fetched liquidations from subgraph");
        Ok(records)
    }
}

// Custom deserializers

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn deserialize_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_optional_address<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.is_empty() => s.parse().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn deserialize_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid u64: {n}"))),
    }
}

fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {n}"))),
    }
}

fn deserialize_optional_u8<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) if s.is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(StringOrNumber::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimals: {n}"))),
        None => Ok(None),
    }
}

fn deserialize_optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) if s.is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(StringOrNumber::Number(n)) => Ok(n.as_f64()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liqtrace_chain::NetworkRegistry;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Serves `total` synthetic rows, newest first.
    struct PagedTransport {
        total: usize,
        requests: Mutex<Vec<(String, GraphRequest)>>,
    }

    impl PagedTransport {
        fn new(total: usize) -> Arc<Self> {
            Arc::new(Self {
                total,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn skips(&self) -> Vec<usize> {
            self.requests.lock().iter().map(|(_, r)| r.variables.skip).collect()
        }
    }

    fn row(n: usize) -> serde_json::Value {
        json!({
            "id": format!("0x{n:064x}-0"),
            "txHash": format!("0x{n:064x}"),
            "timestamp": (1_700_000_000 - n).to_string(),
            "user": { "id": "0x5555555555555555555555555555555555555555" },
            "liquidator": "0x6666666666666666666666666666666666666666",
            "collateralReserve": { "symbol": "WETH", "decimals": 18 },
            "principalReserve": { "symbol": "USDC", "decimals": "6" },
            "collateralAmount": "1500000000000000000",
            "principalAmount": "3000000000",
            "collateralAssetPriceUSD": "2000.5",
            "borrowAssetPriceUSD": 1.0
        })
    }

    #[async_trait]
    impl GraphTransport for PagedTransport {
        async fn post(&self, url: &str, request: &GraphRequest) -> Result<GraphResponse, IndexedError> {
            self.requests.lock().push((url.to_string(), request.clone()));
            let start = request.variables.skip.min(self.total);
            let end = (start + request.variables.first).min(self.total);
            let rows: Vec<_> = (start..end).map(row).collect();
            Ok(serde_json::from_value(json!({ "data": { "liquidationCalls": rows } })).unwrap())
        }
    }

    /// Returns a fixed response body.
    struct FixedTransport(serde_json::Value);

    #[async_trait]
    impl GraphTransport for FixedTransport {
        async fn post(&self, _url: &str, _request: &GraphRequest) -> Result<GraphResponse, IndexedError> {
            serde_json::from_value(self.0.clone()).map_err(|e| IndexedError::Service(e.to_string()))
        }
    }

    fn ethereum() -> NetworkProfile {
        NetworkRegistry::builtin().profile("ethereum").unwrap().clone()
    }

    #[tokio::test]
    async fn test_offset_ceiling_truncates() {
        let transport = PagedTransport::new(6_000);
        let client = IndexedClient::new(transport.clone());

        let records = client
            .fetch(&ethereum(), &LiquidationQuery::new("ethereum"), Some("key"))
            .await
            .unwrap();

        assert_eq!(records.len(), 5_000);
        assert_eq!(transport.skips(), vec![0, 1_000, 2_000, 3_000, 4_000]);
    }

    #[tokio::test]
    async fn test_short_page_stops() {
        let transport = PagedTransport::new(2_345);
        let client = IndexedClient::new(transport.clone());

        let records = client
            .fetch(&ethereum(), &LiquidationQuery::new("ethereum"), Some("key"))
            .await
            .unwrap();

        assert_eq!(records.len(), 2_345);
        assert_eq!(transport.skips(), vec![0, 1_000, 2_000]);
        for pair in records.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_request_shape() {
        let transport = PagedTransport::new(0);
        let client = IndexedClient::new(transport.clone()).with_gateway_url("https://gw.example/api/");
        let user: Address = "0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD".parse().unwrap();
        let query = LiquidationQuery::new("ethereum")
            .between(Some(100), Some(200))
            .with_user(user);

        client.fetch(&ethereum(), &query, Some(" key ")).await.unwrap();

        let (url, request) = transport.requests.lock()[0].clone();
        assert_eq!(
            url,
            "https://gw.example/api/key/subgraphs/id/Cd2gEDVeqnjBn1hSeqFMitw8Q1iiyV9FYUZkLNRcL87g"
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body["variables"]["where"],
            json!({
                "timestamp_gte": "100",
                "timestamp_lte": "200",
                "user": "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"
            })
        );
        assert_eq!(body["variables"]["orderBy"], "timestamp");
        assert_eq!(body["variables"]["orderDirection"], "desc");
        assert_eq!(body["variables"]["first"], 1_000);
    }

    #[tokio::test]
    async fn test_no_credential() {
        let transport = PagedTransport::new(10);
        let client = IndexedClient::new(transport.clone());
        let query = LiquidationQuery::new("ethereum");

        for credential in [None, Some(""), Some("   ")] {
            let err = client.fetch(&ethereum(), &query, credential).await.unwrap_err();
            assert_eq!(err, IndexedError::NoCredential("ethereum".to_string()));
        }

        // Network without a subgraph
        let metis = NetworkRegistry::builtin().profile("metis").unwrap().clone();
        let err = client.fetch(&metis, &query, Some("key")).await.unwrap_err();
        assert!(matches!(err, IndexedError::NoCredential(_)));

        assert!(transport.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_graphql_errors() {
        let client = IndexedClient::new(Arc::new(FixedTransport(json!({
            "errors": [{ "message": "indexing_error" }, { "message": "other" }]
        }))));

        let err = client
            .fetch(&ethereum(), &LiquidationQuery::new("ethereum"), Some("key"))
            .await
            .unwrap_err();
        assert_eq!(err, IndexedError::Service("subgraph query error: indexing_error".to_string()));
    }

    #[tokio::test]
    async fn test_missing_data_is_empty() {
        let client = IndexedClient::new(Arc::new(FixedTransport(json!({ "data": null }))));
        let records = client
            .fetch(&ethereum(), &LiquidationQuery::new("ethereum"), Some("key"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_normalize() {
        let raw: SubgraphLiquidation = serde_json::from_value(row(7)).unwrap();
        let record = raw.normalize("https://etherscan.io");

        assert_eq!(record.timestamp, 1_699_999_993);
        assert_eq!(record.collateral_symbol, "WETH");
        assert!((record.collateral_amount - 1.5).abs() < 1e-12);
        assert!((record.collateral_value_usd.unwrap() - 3_000.75).abs() < 1e-9);
        assert_eq!(record.debt_symbol, "USDC");
        assert!((record.debt_amount - 3_000.0).abs() < 1e-9);
        assert!((record.debt_value_usd.unwrap() - 3_000.0).abs() < 1e-9);
        assert_eq!(record.liquidator, Address::repeat_byte(0x66));
        assert_eq!(record.source, RecordSource::Indexed);
    }

    #[test]
    fn test_normalize_missing_reserve() {
        let raw: SubgraphLiquidation = serde_json::from_value(json!({
            "id": "x",
            "txHash": "0x01",
            "timestamp": 5,
            "user": { "id": "0x5555555555555555555555555555555555555555" },
            "liquidator": null,
            "collateralReserve": null,
            "principalReserve": { "symbol": null, "decimals": null },
            "collateralAmount": "2000000000000000000",
            "principalAmount": 7
        }))
        .unwrap();
        let record = raw.normalize("https://etherscan.io");

        assert_eq!(record.collateral_symbol, "Unknown");
        assert_eq!(record.debt_symbol, "Unknown");
        assert_eq!(record.collateral_amount, 2.0);
        assert_eq!(record.collateral_value_usd, Some(0.0));
        assert_eq!(record.liquidator, Address::ZERO);
    }

    #[tokio::test]
    #[ignore] // Requires network and GRAPH_API_KEY
    async fn test_fetch_live() {
        let key = std::env::var("GRAPH_API_KEY").unwrap();
        let client = IndexedClient::default();
        let query = LiquidationQuery::new("ethereum").between(Some(1_717_200_000), Some(1_717_286_400));
        let records = client.fetch(&ethereum(), &query, Some(&key)).await.unwrap();
        assert!(records.iter().all(|r| query.contains(r.timestamp)));
    }
}
