pub mod auction;
pub mod bidder;
pub mod resolution;
