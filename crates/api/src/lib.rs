//! Indexed query service client.
//!
//! Pages liquidation history out of The Graph's Aave V3 subgraphs through
//! the decentralized gateway. The HTTP layer sits behind [`GraphTransport`].

mod indexed;

pub use indexed::{
    GraphRequest, GraphResponse, GraphTransport, HttpGraphTransport, IndexedClient, IndexedError,
    LiquidationFilter, SubgraphLiquidation, DEFAULT_GATEWAY_URL, DEFAULT_MAX_SKIP,
    DEFAULT_PAGE_SIZE,
};
