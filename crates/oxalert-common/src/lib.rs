//! Data model shared by every oxalert crate: rules, alert instances,
//! notification channels and the per-channel delivery log.

pub mod id;
pub mod types;
