//! Decomposition of oversized Climate Data Store requests into sub-requests
//! that fit the store's selection limit, bounded parallel download of those
//! sub-requests, and incremental updates of the resulting collections.

pub mod app;
pub mod config;
pub mod error;
pub mod expand;
pub mod filter;
pub mod metadata;
pub mod naming;
pub mod orchestrator;
pub mod output;
pub mod split;
pub mod store;
pub mod transfer;
pub mod update;
