use std::path::PathBuf;
use std::time::Duration;

use crate::{Client, Result};

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # use flagship::ClientConfig;
/// let client = ClientConfig::from_sdk_key("server-sdk-key")
///     .remote_url("https://flags.example.com/server")
///     .to_client();
/// ```
pub struct ClientConfig {
    pub(crate) server_sdk_key: String,
    pub(crate) remote_url: String,
    pub(crate) synchronizer_url: Option<String>,
    pub(crate) events_url: Option<String>,
    pub(crate) sync_mode: SyncMode,
    pub(crate) refresh_interval: Duration,
    pub(crate) prerequisite_depth: usize,
    pub(crate) start_wait: Option<Duration>,
}

#[derive(Debug, Clone)]
pub(crate) enum SyncMode {
    Polling,
    LocalFile(PathBuf),
}

impl ClientConfig {
    /// Default base URL the synchronizer and events URLs derive from.
    pub const DEFAULT_REMOTE_URL: &'static str = "http://localhost:4009/server";
    /// Default duration between two polls.
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default prerequisite depth budget.
    pub const DEFAULT_PREREQUISITE_DEPTH: usize = 20;
    /// Default bound on the construction-time wait for the first sync.
    pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(5);

    /// Create a default configuration using the specified server SDK key.
    pub fn from_sdk_key(server_sdk_key: impl Into<String>) -> ClientConfig {
        ClientConfig {
            server_sdk_key: server_sdk_key.into(),
            remote_url: ClientConfig::DEFAULT_REMOTE_URL.to_owned(),
            synchronizer_url: None,
            events_url: None,
            sync_mode: SyncMode::Polling,
            refresh_interval: ClientConfig::DEFAULT_REFRESH_INTERVAL,
            prerequisite_depth: ClientConfig::DEFAULT_PREREQUISITE_DEPTH,
            start_wait: Some(ClientConfig::DEFAULT_START_WAIT),
        }
    }

    /// Override the base URL. The synchronizer and events endpoints derive
    /// from it unless overridden individually.
    pub fn remote_url(mut self, url: impl Into<String>) -> ClientConfig {
        self.remote_url = url.into();
        self
    }

    /// Override the URL the ruleset is fetched from.
    pub fn synchronizer_url(mut self, url: impl Into<String>) -> ClientConfig {
        self.synchronizer_url = Some(url.into());
        self
    }

    /// Override the URL events are reported to.
    pub fn events_url(mut self, url: impl Into<String>) -> ClientConfig {
        self.events_url = Some(url.into());
        self
    }

    /// Synchronize by polling the server (the default).
    pub fn polling_mode(mut self, refresh_interval: Duration) -> ClientConfig {
        self.refresh_interval = refresh_interval;
        self.sync_mode = SyncMode::Polling;
        self
    }

    /// Load the ruleset once from a local JSON file instead of a server.
    pub fn local_file_mode(mut self, path: impl Into<PathBuf>) -> ClientConfig {
        self.sync_mode = SyncMode::LocalFile(path.into());
        self
    }

    /// Restrict how many levels of chained prerequisites an evaluation may
    /// follow before degrading to the default payout.
    pub fn prerequisite_depth(mut self, depth: usize) -> ClientConfig {
        self.prerequisite_depth = depth;
        self
    }

    /// Bound the construction-time wait for the first sync. `None` waits
    /// forever. Timing out leaves the background sync running.
    pub fn start_wait(mut self, start_wait: Option<Duration>) -> ClientConfig {
        self.start_wait = start_wait;
        self
    }

    pub(crate) fn resolved_synchronizer_url(&self) -> String {
        self.synchronizer_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/server-sdk/toggles", self.remote_url))
    }

    pub(crate) fn resolved_events_url(&self) -> String {
        self.events_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/events", self.remote_url))
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientConfig;

    #[test]
    fn urls_derive_from_the_remote_url() {
        let config = ClientConfig::from_sdk_key("key").remote_url("https://host/server");
        assert_eq!(
            config.resolved_synchronizer_url(),
            "https://host/server/api/server-sdk/toggles"
        );
        assert_eq!(config.resolved_events_url(), "https://host/server/api/events");
    }

    #[test]
    fn url_overrides_win() {
        let config = ClientConfig::from_sdk_key("key")
            .synchronizer_url("https://a/toggles")
            .events_url("https://b/events");
        assert_eq!(config.resolved_synchronizer_url(), "https://a/toggles");
        assert_eq!(config.resolved_events_url(), "https://b/events");
    }
}
