pub mod config;
pub mod metrics_provider;
pub mod seed;
