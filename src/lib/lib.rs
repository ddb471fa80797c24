//! Settlement protocol for sealed-bid auctions whose bids are plain value
//! transfers on a public settlement chain, coordinated by a confidential
//! executor that issues per-bidder deposit addresses.

pub mod adapters;
pub mod bidder;
pub mod claim;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod crypto;
pub mod domain;
pub mod ports;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod submit;
