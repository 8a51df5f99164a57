//! Agent central configuration: fetching service settings from the upstream
//! configuration store and caching them for polling agents.

pub mod client;
pub mod config;
pub mod fetcher;
pub mod metrics_defs;
pub mod store;
pub mod types;
pub mod version;

pub use client::HttpConfigStore;
pub use fetcher::{CachingFetcher, DisabledFetcher, Fetcher};
pub use store::{ConfigStore, FetchError};
pub use types::{ETAG_SENTINEL, FetchResult, Query, Service, Settings, StoreDocument};
