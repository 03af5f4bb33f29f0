//! In-memory [`LedgerRpc`] for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::LedgerError;
use crate::rpc::{ChainHead, LedgerRpc, LiquidationEvent};

/// Seconds between mock blocks.
pub const MOCK_BLOCK_TIME: u64 = 12;

/// Scripted ledger.
///
/// Block `n` has timestamp `head.timestamp - (head.number - n) * 12`.
/// Successful `eth_getLogs` spans are recorded for inspection.
#[derive(Debug)]
pub struct MockLedger {
    head: ChainHead,
    events: Vec<LiquidationEvent>,
    tokens: HashMap<Address, (String, u8)>,
    /// Reject spans longer than this
    max_range: Option<u64>,
    /// Start blocks rejected once as too large
    reject_once: Mutex<HashSet<u64>>,
    /// Start block that fails with a transport error
    fatal_at: Option<u64>,
    /// Provider message `head()` fails with
    head_error: Option<String>,
    /// Provider message `block_timestamp()` fails with
    timestamp_error: Option<String>,
    /// Blocks the node does not return
    missing_blocks: HashSet<u64>,
    ranges: Mutex<Vec<(u64, u64)>>,
    users: Mutex<Vec<Option<Address>>>,
    returned: AtomicUsize,
    block_calls: AtomicUsize,
    token_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            head: ChainHead {
                number: 20_000_000,
                timestamp: 1_720_000_000,
            },
            events: Vec::new(),
            tokens: HashMap::new(),
            max_range: None,
            reject_once: Mutex::new(HashSet::new()),
            fatal_at: None,
            head_error: None,
            timestamp_error: None,
            missing_blocks: HashSet::new(),
            ranges: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            returned: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_head(mut self, head: ChainHead) -> Self {
        self.head = head;
        self
    }

    pub fn with_event(mut self, event: LiquidationEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_token(mut self, token: Address, symbol: &str, decimals: u8) -> Self {
        self.tokens.insert(token, (symbol.to_string(), decimals));
        self
    }

    pub fn with_max_range(mut self, blocks: u64) -> Self {
        self.max_range = Some(blocks);
        self
    }

    pub fn with_reject_once(self, from_block: u64) -> Self {
        self.reject_once.lock().insert(from_block);
        self
    }

    pub fn with_fatal_at(mut self, from_block: u64) -> Self {
        self.fatal_at = Some(from_block);
        self
    }

    pub fn with_head_down(self) -> Self {
        self.with_head_error("connection refused")
    }

    /// Fail `head()` with a provider message, classified like a real one.
    pub fn with_head_error(mut self, message: &str) -> Self {
        self.head_error = Some(message.to_string());
        self
    }

    /// Fail every `block_timestamp()` with a provider message.
    pub fn with_timestamp_error(mut self, message: &str) -> Self {
        self.timestamp_error = Some(message.to_string());
        self
    }

    /// Report `block` as not found.
    pub fn with_missing_block(mut self, block: u64) -> Self {
        self.missing_blocks.insert(block);
        self
    }

    /// Timestamp the mock reports for `block`.
    pub fn timestamp_of(&self, block: u64) -> u64 {
        let behind = self.head.number.saturating_sub(block);
        self.head.timestamp.saturating_sub(behind * MOCK_BLOCK_TIME)
    }

    /// Successfully queried `(from, to)` spans, in call order.
    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().clone()
    }

    /// User filter of every log query, in call order.
    pub fn log_users(&self) -> Vec<Option<Address>> {
        self.users.lock().clone()
    }

    /// Events handed out across all log queries.
    pub fn events_returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }

    /// `block_timestamp` calls.
    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    /// `token_symbol` + `token_decimals` calls.
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    /// Most `block_timestamp` and token calls outstanding at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Hold a call open across a yield so overlapping callers are counted.
    async fn track_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn head(&self) -> Result<ChainHead, LedgerError> {
        if let Some(message) = &self.head_error {
            return Err(LedgerError::classify(message.as_str()));
        }
        Ok(self.head)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, LedgerError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.track_call().await;
        if let Some(message) = &self.timestamp_error {
            return Err(LedgerError::classify(message.as_str()));
        }
        if number > self.head.number || self.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(self.timestamp_of(number)))
    }

    async fn liquidation_events(
        &self,
        _pool: Address,
        from: u64,
        to: u64,
        user: Option<Address>,
    ) -> Result<Vec<LiquidationEvent>, LedgerError> {
        self.users.lock().push(user);

        if self.fatal_at == Some(from) {
            return Err(LedgerError::Transport("upstream gateway timeout".to_string()));
        }
        if self.reject_once.lock().remove(&from) {
            return Err(LedgerError::RangeTooLarge("block range is too large".to_string()));
        }
        if let Some(max) = self.max_range {
            if to - from + 1 > max {
                return Err(LedgerError::RangeTooLarge(format!(
                    "eth_getLogs is limited to a {max} range"
                )));
            }
        }

        self.ranges.lock().push((from, to));
        let events: Vec<LiquidationEvent> = self
            .events
            .iter()
            .filter(|e| (from..=to).contains(&e.block_number))
            .filter(|e| user.map_or(true, |u| e.user == u))
            .cloned()
            .collect();
        self.returned.fetch_add(events.len(), Ordering::SeqCst);
        Ok(events)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, LedgerError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.track_call().await;
        self.tokens
            .get(&token)
            .map(|(symbol, _)| symbol.clone())
            .ok_or_else(|| LedgerError::Transport("execution reverted".to_string()))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, LedgerError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .get(&token)
            .map(|(_, decimals)| *decimals)
            .ok_or_else(|| LedgerError::Transport("execution reverted".to_string()))
    }
}

/// Liquidation of 1 collateral unit (18 decimals) for 1 debt unit (6 decimals).
pub fn event(block: u64, log_index: u64, collateral: Address, debt: Address) -> LiquidationEvent {
    LiquidationEvent {
        collateral_asset: collateral,
        debt_asset: debt,
        user: Address::repeat_byte(0x55),
        debt_to_cover: U256::from(1_000_000u64),
        liquidated_collateral: U256::from(10u128.pow(18)),
        liquidator: Address::repeat_byte(0x66),
        block_number: block,
        tx_hash: B256::from(U256::from(block * 1_000_000 + log_index)),
        log_index,
    }
}
