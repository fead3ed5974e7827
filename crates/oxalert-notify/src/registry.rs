use crate::channels::ChannelAdapter;
use crate::utils::redact_sensitive_json;
use oxalert_common::types::NotificationChannel;
use oxalert_storage::ChannelStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A channel record together with the adapter built from its config.
pub struct RegisteredChannel {
    pub channel: NotificationChannel,
    pub adapter: ChannelAdapter,
}

type Snapshot = Arc<HashMap<String, Arc<RegisteredChannel>>>;

/// In-memory cache of the enabled channels, keyed by channel id.
///
/// Readers take a cheap clone of the current snapshot; [`refresh`] builds a
/// fresh map off to the side and swaps it in, so a dispatch in flight keeps
/// the adapters it started with.
///
/// [`refresh`]: ChannelRegistry::refresh
pub struct ChannelRegistry {
    client: reqwest::Client,
    channels: RwLock<Snapshot>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            channels: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Reloads every enabled channel from the store.
    ///
    /// Channels whose config no longer validates are logged and left out.
    /// Returns the number of channels now cached.
    pub async fn refresh(&self, store: &dyn ChannelStore) -> oxalert_storage::Result<usize> {
        let records = store.list_enabled_channels().await?;
        let mut next = HashMap::with_capacity(records.len());
        for channel in records {
            match ChannelAdapter::build(&channel, &self.client) {
                Ok(adapter) => {
                    next.insert(
                        channel.id.clone(),
                        Arc::new(RegisteredChannel { channel, adapter }),
                    );
                }
                Err(e) => {
                    tracing::error!(
                        channel_id = %channel.id,
                        channel_type = %channel.channel_type,
                        config = %redact_sensitive_json(&channel.config),
                        error = %e,
                        "Skipping channel with invalid config"
                    );
                }
            }
        }
        let count = next.len();
        self.replace(next);
        tracing::info!(channels = count, "Channel registry refreshed");
        Ok(count)
    }

    /// Installs a prebuilt set of channels, replacing the current snapshot.
    pub fn replace(&self, channels: HashMap<String, Arc<RegisteredChannel>>) {
        let mut guard = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(channels);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<RegisteredChannel>> {
        self.snapshot().get(channel_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
