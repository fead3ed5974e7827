//! Notification delivery for alert events.
//!
//! Each configured [`oxalert_common::types::NotificationChannel`] is turned
//! into a [`channels::ChannelAdapter`] when the [`registry::ChannelRegistry`]
//! loads. The [`dispatcher::NotificationDispatcher`] fans an event out to the
//! channels linked to its rule, one independent attempt per channel, and
//! appends every attempt to the notification log.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod utils;


pub use channels::{validate_channel_config, ChannelAdapter};
pub use dispatcher::{ChannelOutcome, NotificationDispatcher};
pub use error::{NotifyError, Result};
pub use registry::{ChannelRegistry, RegisteredChannel};

/// What an adapter observed while delivering one event.
///
/// The request and response bodies are truncated to
/// [`utils::MAX_BODY_LENGTH`] and end up on the attempt row. `error` is set
/// when the delivery failed, including non-2xx HTTP responses.
#[derive(Debug, Default)]
pub struct SendResponse {
    pub request_body: Option<String>,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<NotifyError>,
}

impl SendResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn failed(request_body: Option<String>, error: NotifyError) -> Self {
        Self {
            request_body,
            error: Some(error),
            ..Default::default()
        }
    }
}
