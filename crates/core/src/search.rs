//! Retrieval orchestrator.
//!
//! Per query: validate, try the indexed service when a credential is
//! configured, and fall back to a ledger scan on any indexed failure.
//! Indexed failures are logged and never reach the caller; scan failures do.

use std::sync::Arc;

use liqtrace_api::{IndexedClient, IndexedError};
use liqtrace_chain::{
    sort_newest_first, HttpConnector, LedgerConnector, LedgerError, LiquidationQuery,
    LiquidationRecord, NetworkProfile, NetworkRegistry, RecordSource, ScanClient, ScanCoverage,
    TokenMetadataCache,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;

/// Failure surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Unknown network or malformed time window; nothing was attempted
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The ledger scan failed after any fallback
    #[error("failed to fetch liquidations: {0}")]
    Scan(#[from] LedgerError),
}

/// Outcome of the indexed attempt.
#[derive(Debug)]
pub enum IndexedAttempt {
    Records(Vec<LiquidationRecord>),
    /// Scan instead; the reason is only logged
    Fallback(IndexedError),
}

/// Records from one query plus where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Newest first
    pub records: Vec<LiquidationRecord>,
    pub source: RecordSource,
    /// The scan stopped before the end of the requested span
    pub is_partial: bool,
    /// Block coverage, for scanned results
    pub coverage: Option<ScanCoverage>,
}

impl RetrievalResult {
    /// Warning for partial results.
    pub fn warning(&self) -> Option<String> {
        if !self.is_partial {
            return None;
        }
        let scanned = self
            .coverage
            .and_then(|c| c.scanned.map(|s| format!(" (blocks {} to {} of {})", s.from, s.to, c.requested.to)))
            .unwrap_or_default();
        Some(format!(
            "Results are partial: the ledger scan reached its chunk limit before the end of the \
             date range{scanned}. Narrow the range or configure a Graph API key for complete results."
        ))
    }
}

/// Flat result for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReport {
    pub records: Vec<LiquidationRecord>,
    pub source: Option<RecordSource>,
    pub is_partial: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl From<Result<RetrievalResult, SearchError>> for SearchReport {
    fn from(result: Result<RetrievalResult, SearchError>) -> Self {
        match result {
            Ok(result) => Self {
                warning: result.warning(),
                source: Some(result.source),
                is_partial: result.is_partial,
                records: result.records,
                error: None,
            },
            Err(err) => Self {
                records: Vec::new(),
                source: None,
                is_partial: false,
                warning: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Liquidation history search engine.
pub struct LiquidationSearch {
    registry: NetworkRegistry,
    indexed: IndexedClient,
    scan: ScanClient,
    connector: Arc<dyn LedgerConnector>,
    credential: Option<String>,
}

impl LiquidationSearch {
    /// Create an engine with no indexed-service credential.
    pub fn new(
        registry: NetworkRegistry,
        indexed: IndexedClient,
        scan: ScanClient,
        connector: Arc<dyn LedgerConnector>,
    ) -> Self {
        Self {
            registry,
            indexed,
            scan,
            connector,
            credential: None,
        }
    }

    /// Build the HTTP-backed engine described by `config`.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let registry = config.registry()?;
        let indexed = IndexedClient::default()
            .with_gateway_url(config.indexed.gateway_url.as_str())
            .with_page_size(config.indexed.page_size)
            .with_max_skip(config.indexed.max_skip);
        let scan = ScanClient::new(Arc::new(TokenMetadataCache::new()))
            .with_max_chunks(config.scan.max_chunks)
            .with_min_chunk_size(config.scan.min_chunk_size)
            .with_max_concurrent(config.scan.max_concurrent);

        Ok(Self::new(registry, indexed, scan, Arc::new(HttpConnector))
            .with_credential(config.credential().map(str::to_string)))
    }

    /// Set the indexed-service credential.
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    /// Run one query.
    #[instrument(skip(self, query), fields(network = %query.network))]
    pub async fn search(&self, query: &LiquidationQuery) -> Result<RetrievalResult, SearchError> {
        let profile = self.validate(query)?;

        if let Some(credential) = self.credential.as_deref() {
            match self.attempt_indexed(profile, query, credential).await {
                IndexedAttempt::Records(records) => {
                    info!(records = records.len(), source = "indexed", "Search complete");
                    return Ok(RetrievalResult {
                        records,
                        source: RecordSource::Indexed,
                        is_partial: false,
                        coverage: None,
                    });
                }
                IndexedAttempt::Fallback(reason) => {
                    warn!(reason = %reason, "Indexed query failed, falling back to ledger scan");
                }
            }
        }

        let rpc = self.connector.connect(profile)?;
        let outcome = self.scan.fetch(rpc.as_ref(), profile, query).await?;

        info!(
            records = outcome.records.len(),
            source = "scan",
            partial = outcome.is_partial,
            "Search complete"
        );
        Ok(RetrievalResult {
            records: outcome.records,
            source: RecordSource::Scan,
            is_partial: outcome.is_partial,
            coverage: Some(outcome.coverage),
        })
    }

    /// [`Self::search`] flattened for display.
    pub async fn search_report(&self, query: &LiquidationQuery) -> SearchReport {
        self.search(query).await.into()
    }

    fn validate(&self, query: &LiquidationQuery) -> Result<&NetworkProfile, SearchError> {
        let profile = self
            .registry
            .profile(&query.network)
            .ok_or_else(|| SearchError::InvalidQuery(format!("unknown network '{}'", query.network)))?;

        if let (Some(start), Some(end)) = (query.start, query.end) {
            if start > end {
                return Err(SearchError::InvalidQuery(format!(
                    "start {start} is after end {end}"
                )));
            }
        }
        Ok(profile)
    }

    async fn attempt_indexed(
        &self,
        profile: &NetworkProfile,
        query: &LiquidationQuery,
        credential: &str,
    ) -> IndexedAttempt {
        match self.indexed.fetch(profile, query, Some(credential)).await {
            Ok(mut records) => {
                sort_newest_first(&mut records);
                IndexedAttempt::Records(records)
            }
            Err(err) => IndexedAttempt::Fallback(err),
        }
    }
}
