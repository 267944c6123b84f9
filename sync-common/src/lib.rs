pub mod config;
pub mod error;
pub mod expander;
pub mod fetcher;
pub mod metrics;
pub mod models;
pub mod payload;
pub mod reconcile;
pub mod source;
pub mod status;
pub mod store;
pub mod sync;
pub mod webhook;
