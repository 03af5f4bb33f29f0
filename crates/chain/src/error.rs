//! Ledger RPC error classification.

use thiserror::Error;

/// Fragments providers use when rejecting an `eth_getLogs` span.
///
/// Covers geth/erigon ("query returned more than 10000 results"), Alchemy
/// and Infura ("block range"), publicnode/drpc ("range is too large",
/// "exceed maximum block range") and size-based limits.
const RANGE_ERROR_MARKERS: &[&str] = &[
    "block range",
    "range is too large",
    "range too large",
    "range limit",
    "exceed maximum block range",
    "exceeds the range",
    "query returned more than",
    "too many results",
    "too many logs",
    "response size",
];

/// Generic limit wording; a range error only when it names the span.
const LIMIT_MARKERS: &[&str] = &["limited to", "limit exceeded", "-32005"];

/// Words that tie a generic limit to the queried span.
const SPAN_WORDS: &[&str] = &["range", "block", "results", "size"];

/// Failure of a ledger RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Provider refused the block span; recoverable by shrinking the chunk.
    #[error("block range rejected: {0}")]
    RangeTooLarge(String),

    /// Any other failure; aborts the scan.
    #[error("rpc transport failure: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Classify a provider error message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let span_limit = LIMIT_MARKERS.iter().any(|m| lower.contains(m))
            && SPAN_WORDS.iter().any(|w| lower.contains(w));
        if span_limit || RANGE_ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::RangeTooLarge(message)
        } else {
            Self::Transport(message)
        }
    }

    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::RangeTooLarge(_))
    }

    /// Demote a range rejection to a transport failure. Only chunk queries
    /// can recover from a rejected span.
    pub fn into_transport(self) -> Self {
        match self {
            Self::RangeTooLarge(message) => Self::Transport(message),
            other => other,
        }
    }
}

impl From<alloy::transports::TransportError> for LedgerError {
    fn from(err: alloy::transports::TransportError) -> Self {
        Self::classify(err.to_string())
    }
}
