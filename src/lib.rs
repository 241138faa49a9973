pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod idempotency;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod schema;
pub mod storage;
pub mod types;
