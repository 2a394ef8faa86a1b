//! Chart playlists library: chart ingestion, catalog matching and playlist
//! reconciliation, shared by the `chart-playlists` binary.

pub mod cache;
pub mod catalog;
pub mod comparator;
pub mod config;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod paging;
pub mod progress;
pub mod query;
pub mod reconcile;
pub mod resolver;
pub mod safety;
pub mod scoring;
pub mod scrape;
pub mod store;
pub mod sync;
