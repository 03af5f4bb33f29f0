//! Ledger scan client.
//!
//! Retrieves `LiquidationCall` events straight from an RPC node when no
//! indexed service is available:
//!
//! 1. Anchor on the chain head and estimate block numbers for the query's
//!    timestamps (linear in the profile's average block time).
//! 2. Scan the block span in chunks of at most `max_log_range` blocks, up to
//!    `max_chunks` successful chunk queries. A provider that rejects the span
//!    halves the chunk size (down to `min_chunk_size`) for the rest of that
//!    chunk, retrying the same start block without spending a chunk credit.
//! 3. Filter by liquidator, resolve token metadata and block timestamps
//!    concurrently (at most `max_concurrent` requests in flight), build
//!    records and sort them newest first.
//!
//! A scan that runs out of chunk credits before reaching the end block
//! returns what it found with `is_partial = true`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::Address;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::LedgerError;
use crate::metadata::{TokenMetadata, TokenMetadataCache};
use crate::network::{NetworkProfile, MAX_SCAN_CHUNKS};
use crate::record::{
    decimal_adjust, sort_newest_first, LiquidationQuery, LiquidationRecord, RecordSource,
};
use crate::rpc::{ChainHead, LedgerRpc, LiquidationEvent};

/// Smallest chunk the adaptive shrink will try.
pub const MIN_CHUNK_SIZE: u64 = 500;

/// Metadata and timestamp requests in flight at once.
pub const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Inclusive block interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSpan {
    pub from: u64,
    pub to: u64,
}

impl BlockSpan {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Number of blocks in the span.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.to - self.from + 1
        }
    }
}

/// What a scan actually covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanCoverage {
    /// Span derived from the query
    pub requested: BlockSpan,
    /// Prefix of `requested` that was queried; `None` if nothing was
    pub scanned: Option<BlockSpan>,
    /// Successful chunk queries
    pub chunks: u32,
    /// Chunk-size halvings after range rejections
    pub shrinks: u32,
}

/// Result of a ledger scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// Records, newest first
    pub records: Vec<LiquidationRecord>,
    /// The chunk budget ran out before the end of the requested span
    pub is_partial: bool,
    pub coverage: ScanCoverage,
}

/// Linear time-to-block estimate anchored on the chain head.
///
/// `head.number - floor((head.timestamp - target) / avg_block_time)`,
/// clamped to `[0, head.number]`.
pub fn estimate_block(head: ChainHead, target: u64, avg_block_time: f64) -> u64 {
    if target >= head.timestamp {
        return head.number;
    }
    let elapsed = (head.timestamp - target) as f64;
    // f64 -> u64 casts saturate
    let blocks_back = (elapsed / avg_block_time).floor() as u64;
    head.number.saturating_sub(blocks_back)
}

/// Block span a query maps to on a given chain.
pub fn requested_span(head: ChainHead, profile: &NetworkProfile, query: &LiquidationQuery) -> BlockSpan {
    let from = query
        .start
        .map(|ts| estimate_block(head, ts, profile.avg_block_time).max(profile.start_block))
        .unwrap_or(profile.start_block);
    let to = query
        .end
        .map(|ts| estimate_block(head, ts, profile.avg_block_time))
        .unwrap_or(head.number);
    BlockSpan::new(from, to)
}

/// Chunk-scan state machine.
///
/// Each transition returns a new cursor; the loop in
/// [`ScanClient::scan_chunks`] only ever replaces its cursor. A shrink is
/// scoped to the rejected chunk: once its blocks are covered the cursor goes
/// back to the full chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkCursor {
    /// First block not yet scanned
    next: u64,
    /// Last block to scan (inclusive)
    end: u64,
    /// Full chunk size (the profile's `max_log_range`)
    chunk_size: u64,
    /// Reduced size and last block of the rejected chunk
    retry: Option<(u64, u64)>,
    chunks_used: u32,
    shrinks: u32,
}

impl ChunkCursor {
    fn new(span: BlockSpan, chunk_size: u64) -> Self {
        Self {
            next: span.from,
            end: span.to,
            chunk_size: chunk_size.max(1),
            retry: None,
            chunks_used: 0,
            shrinks: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.next > self.end
    }

    /// Size the next query uses.
    fn current_size(&self) -> u64 {
        self.retry.map_or(self.chunk_size, |(size, _)| size)
    }

    /// Next chunk to query.
    fn window(&self) -> BlockSpan {
        let limit = self.retry.map_or(self.end, |(_, until)| until);
        let to = self
            .next
            .saturating_add(self.current_size() - 1)
            .min(limit);
        BlockSpan::new(self.next, to)
    }

    /// The chunk ending at `to` succeeded.
    fn advance(self, to: u64) -> Self {
        Self {
            next: to + 1,
            retry: self.retry.filter(|&(_, until)| to < until),
            chunks_used: self.chunks_used + 1,
            ..self
        }
    }

    /// The chunk was rejected for its size; `None` once at the floor.
    fn shrink(self, min_chunk_size: u64) -> Option<Self> {
        let size = self.current_size();
        if size <= min_chunk_size {
            return None;
        }
        let until = self.retry.map_or(self.window().to, |(_, until)| until);
        Some(Self {
            retry: Some(((size / 2).max(min_chunk_size), until)),
            shrinks: self.shrinks + 1,
            ..self
        })
    }
}

/// Direct ledger scan client.
#[derive(Debug, Clone)]
pub struct ScanClient {
    /// Shared token metadata cache
    cache: Arc<TokenMetadataCache>,
    /// Successful chunk queries allowed per scan
    max_chunks: u32,
    /// Floor for the adaptive chunk shrink
    min_chunk_size: u64,
    /// Bound on concurrent metadata and timestamp requests
    max_concurrent: usize,
}

impl ScanClient {
    /// Create a scan client with the default limits.
    pub fn new(cache: Arc<TokenMetadataCache>) -> Self {
        Self {
            cache,
            max_chunks: MAX_SCAN_CHUNKS,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_concurrent: MAX_CONCURRENT_REQUESTS,
        }
    }

    /// Set the chunk budget.
    pub fn with_max_chunks(mut self, max_chunks: u32) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    /// Set the shrink floor.
    pub fn with_min_chunk_size(mut self, min_chunk_size: u64) -> Self {
        self.min_chunk_size = min_chunk_size.max(1);
        self
    }

    /// Set the resolution fan-out bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn max_chunks(&self) -> u32 {
        self.max_chunks
    }

    pub fn cache(&self) -> &Arc<TokenMetadataCache> {
        &self.cache
    }

    /// Scan `profile`'s pool for liquidations matching `query`.
    ///
    /// Only non-range RPC failures are errors; running out of chunk budget
    /// yields a partial outcome.
    #[instrument(skip(self, rpc, profile, query), fields(network = %profile.key))]
    pub async fn fetch(
        &self,
        rpc: &dyn LedgerRpc,
        profile: &NetworkProfile,
        query: &LiquidationQuery,
    ) -> Result<ScanOutcome, LedgerError> {
        let head = rpc.head().await.map_err(LedgerError::into_transport)?;
        let requested = requested_span(head, profile, query);

        debug!(
            head = head.number,
            from_block = requested.from,
            to_block = requested.to,
            blocks = requested.len(),
            "Resolved scan span"
        );

        if requested.is_empty() {
            return Ok(ScanOutcome {
                records: Vec::new(),
                is_partial: false,
                coverage: ScanCoverage {
                    requested,
                    scanned: None,
                    chunks: 0,
                    shrinks: 0,
                },
            });
        }

        let (events, cursor) = self
            .scan_chunks(rpc, profile, requested, query.user)
            .await?;

        let is_partial = !cursor.is_done();
        let coverage = ScanCoverage {
            requested,
            scanned: (cursor.next > requested.from)
                .then(|| BlockSpan::new(requested.from, cursor.next - 1)),
            chunks: cursor.chunks_used,
            shrinks: cursor.shrinks,
        };
        if is_partial {
            warn!(
                scanned_to = cursor.next.saturating_sub(1),
                to_block = requested.to,
                chunks = cursor.chunks_used,
                "Chunk budget exhausted, scan is partial"
            );
        }

        // LiquidationCall does not index the liquidator
        let events: Vec<LiquidationEvent> = match query.liquidator {
            Some(liquidator) => events
                .into_iter()
                .filter(|e| e.liquidator == liquidator)
                .collect(),
            None => events,
        };

        let records = self.build_records(rpc, profile, query, &events).await?;

        info!(
            events = events.len(),
            records = records.len(),
            partial = is_partial,
            "Ledger scan complete"
        );

        Ok(ScanOutcome {
            records,
            is_partial,
            coverage,
        })
    }

    /// Run the chunk loop over `span`.
    async fn scan_chunks(
        &self,
        rpc: &dyn LedgerRpc,
        profile: &NetworkProfile,
        span: BlockSpan,
        user: Option<Address>,
    ) -> Result<(Vec<LiquidationEvent>, ChunkCursor), LedgerError> {
        let mut cursor = ChunkCursor::new(span, profile.max_log_range);
        let mut events = Vec::new();

        while !cursor.is_done() && cursor.chunks_used < self.max_chunks {
            let window = cursor.window();

            match rpc
                .liquidation_events(profile.pool, window.from, window.to, user)
                .await
            {
                Ok(chunk) => {
                    debug!(
                        from_block = window.from,
                        to_block = window.to,
                        events = chunk.len(),
                        "Scanned chunk"
                    );
                    events.extend(chunk);
                    cursor = cursor.advance(window.to);
                }
                Err(LedgerError::RangeTooLarge(reason)) => match cursor.shrink(self.min_chunk_size) {
                    Some(next) => {
                        warn!(
                            from_block = window.from,
                            chunk_size = cursor.current_size(),
                            new_chunk_size = next.current_size(),
                            reason = %reason,
                            "Block range rejected, shrinking chunk"
                        );
                        cursor = next;
                    }
                    None => {
                        return Err(LedgerError::Transport(format!(
                            "block range rejected at minimum chunk size {}: {reason}",
                            cursor.current_size()
                        )));
                    }
                },
                Err(err) => return Err(err),
            }
        }

        Ok((events, cursor))
    }

    /// Resolve metadata and timestamps, then build records.
    async fn build_records(
        &self,
        rpc: &dyn LedgerRpc,
        profile: &NetworkProfile,
        query: &LiquidationQuery,
        events: &[LiquidationEvent],
    ) -> Result<Vec<LiquidationRecord>, LedgerError> {
        let tokens: HashSet<Address> = events
            .iter()
            .flat_map(|e| [e.collateral_asset, e.debt_asset])
            .collect();
        let blocks: BTreeSet<u64> = events.iter().map(|e| e.block_number).collect();

        let chain_id = profile.chain_id;
        let (metadata, timestamps) = tokio::join!(
            stream::iter(tokens)
                .map(|token| async move {
                    (token, self.cache.resolve(rpc, chain_id, token).await)
                })
                .buffer_unordered(self.max_concurrent)
                .collect::<Vec<_>>(),
            stream::iter(blocks)
                .map(|block| async move {
                    rpc.block_timestamp(block).await.map(|ts| (block, ts))
                })
                .buffer_unordered(self.max_concurrent)
                .collect::<Vec<_>>(),
        );

        let metadata: HashMap<Address, TokenMetadata> = metadata.into_iter().collect();
        let timestamps: HashMap<u64, Option<u64>> = timestamps
            .into_iter()
            .collect::<Result<_, _>>()
            .map_err(LedgerError::into_transport)?;

        let mut records: Vec<LiquidationRecord> = events
            .iter()
            .filter_map(|event| {
                let timestamp = timestamps.get(&event.block_number).copied().flatten();
                // Block estimates are approximate; the timestamps are exact.
                // Records of unknown blocks are kept with timestamp 0.
                let timestamp = match timestamp {
                    Some(ts) if !query.contains(ts) => return None,
                    Some(ts) => ts,
                    None => {
                        warn!(block = event.block_number, "Block not found, timestamp unknown");
                        0
                    }
                };
                let collateral = metadata
                    .get(&event.collateral_asset)
                    .cloned()
                    .unwrap_or_else(|| TokenMetadata::placeholder(event.collateral_asset));
                let debt = metadata
                    .get(&event.debt_asset)
                    .cloned()
                    .unwrap_or_else(|| TokenMetadata::placeholder(event.debt_asset));

                Some(scanned_record(event, timestamp, collateral, debt, &profile.explorer_url))
            })
            .collect();

        sort_newest_first(&mut records);
        Ok(records)
    }
}

fn scanned_record(
    event: &LiquidationEvent,
    timestamp: u64,
    collateral: TokenMetadata,
    debt: TokenMetadata,
    explorer_url: &str,
) -> LiquidationRecord {
    let tx_hash = format!("{:#x}", event.tx_hash);
    LiquidationRecord {
        id: format!("{tx_hash}-{}", event.log_index),
        tx_hash,
        timestamp,
        user: event.user,
        liquidator: event.liquidator,
        collateral_amount: decimal_adjust(event.liquidated_collateral, collateral.decimals),
        collateral_symbol: collateral.symbol,
        collateral_value_usd: None,
        debt_amount: decimal_adjust(event.debt_to_cover, debt.decimals),
        debt_symbol: debt.symbol,
        debt_value_usd: None,
        explorer_url: explorer_url.to_string(),
        source: RecordSource::Scan,
    }
}
