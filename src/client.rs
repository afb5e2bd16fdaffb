use std::sync::Arc;

use crate::config::SyncMode;
use crate::eval::EvaluationResult;
use crate::event_processor::EventProcessor;
use crate::events::{unix_millis, AccessEvent, CustomEvent, DebugEvent, Event};
use crate::file_sync::sync_from_file;
use crate::poller::{PollerThread, PollerThreadConfig};
use crate::repository::Toggle;
use crate::repository_store::RepositoryStore;
use crate::user::User;
use crate::{ClientConfig, Error, Result};

/// A client evaluating feature toggles against a locally cached ruleset.
///
/// Client instances are thread-safe; applications should create a single
/// `Client` for their lifetime. Evaluations never touch the network and
/// never fail: any data problem degrades to the caller's default value.
///
/// # Examples
/// ```no_run
/// # use flagship::{ClientConfig, User};
/// # fn main() -> flagship::Result<()> {
/// let client = ClientConfig::from_sdk_key("server-sdk-key").to_client()?;
/// let user = User::new().with_key("user-42").with("plan", "vip");
/// if client.bool_value("checkout_redesign", &user, false) {
///     // new checkout
/// }
/// # Ok(()) }
/// ```
pub struct Client {
    config: ClientConfig,
    store: Arc<RepositoryStore>,
    events: EventProcessor,
    poller: Option<PollerThread>,
}

/// Evaluation result with metadata explaining how the value was decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail<T> {
    /// The resolved variation, or the caller-supplied default.
    pub value: T,
    /// Which rule matched, if any.
    pub rule_index: Option<usize>,
    /// Version of the evaluated toggle.
    pub version: Option<u64>,
    /// Human-readable explanation of the decision.
    pub reason: String,
}

impl Client {
    /// Create a new client and start its synchronizer and event pipeline.
    ///
    /// Construction blocks up to `start_wait` for the first sync; on
    /// timeout the client is returned anyway and keeps synchronizing in
    /// the background. A blank SDK key is the only construction error.
    pub fn new(config: ClientConfig) -> Result<Client> {
        if config.server_sdk_key.trim().is_empty() {
            return Err(Error::MissingSdkKey);
        }

        let store = Arc::new(RepositoryStore::new());
        let events = EventProcessor::start(
            config.resolved_events_url(),
            config.server_sdk_key.clone(),
        )?;

        let poller = match &config.sync_mode {
            SyncMode::Polling => {
                let poller = PollerThread::start(PollerThreadConfig {
                    store: store.clone(),
                    synchronizer_url: config.resolved_synchronizer_url(),
                    server_sdk_key: config.server_sdk_key.clone(),
                    interval: config.refresh_interval,
                })?;

                match poller.wait_for_initialization(config.start_wait) {
                    Ok(()) => {}
                    Err(Error::InitializationTimeout) => {
                        log::warn!(target: "flagship",
                                   "timeout waiting for client initialization (sync continues in background)");
                    }
                    Err(err) => {
                        log::error!(target: "flagship",
                                    "error waiting for client initialization: {err}");
                    }
                }

                Some(poller)
            }
            SyncMode::LocalFile(path) => {
                if let Err(err) = sync_from_file(path, &store) {
                    log::error!(target: "flagship",
                                "failed to load repository file: {err}");
                }
                None
            }
        };

        if !store.initialized() {
            log::warn!(target: "flagship", "client was not successfully initialized");
        }

        Ok(Client {
            config,
            store,
            events,
            poller,
        })
    }

    /// Whether at least one sync has completed.
    pub fn initialized(&self) -> bool {
        self.store.initialized()
    }

    /// Evaluate a boolean toggle.
    pub fn bool_value(&self, toggle_key: &str, user: &User, default_value: bool) -> bool {
        self.bool_detail(toggle_key, user, default_value).value
    }

    /// Evaluate a string toggle.
    pub fn string_value(&self, toggle_key: &str, user: &User, default_value: &str) -> String {
        self.string_detail(toggle_key, user, default_value).value
    }

    /// Evaluate a numeric toggle. Integer-valued variations widen to `f64`.
    pub fn number_value(&self, toggle_key: &str, user: &User, default_value: f64) -> f64 {
        self.number_detail(toggle_key, user, default_value).value
    }

    /// Evaluate a JSON toggle.
    pub fn json_value(
        &self,
        toggle_key: &str,
        user: &User,
        default_value: serde_json::Value,
    ) -> serde_json::Value {
        self.json_detail(toggle_key, user, default_value).value
    }

    /// Evaluate a boolean toggle, explaining the decision.
    pub fn bool_detail(&self, toggle_key: &str, user: &User, default_value: bool) -> Detail<bool> {
        self.detail(
            toggle_key,
            user,
            serde_json::Value::from(default_value),
            default_value,
            |value| value.as_bool(),
        )
    }

    /// Evaluate a string toggle, explaining the decision.
    pub fn string_detail(
        &self,
        toggle_key: &str,
        user: &User,
        default_value: &str,
    ) -> Detail<String> {
        self.detail(
            toggle_key,
            user,
            serde_json::Value::from(default_value),
            default_value.to_owned(),
            |value| value.as_str().map(str::to_owned),
        )
    }

    /// Evaluate a numeric toggle, explaining the decision.
    pub fn number_detail(
        &self,
        toggle_key: &str,
        user: &User,
        default_value: f64,
    ) -> Detail<f64> {
        self.detail(
            toggle_key,
            user,
            serde_json::Value::from(default_value),
            default_value,
            // Integer variations widen to the requested numeric type;
            // this is the evaluator's only implicit coercion.
            |value| value.as_f64(),
        )
    }

    /// Evaluate a JSON toggle, explaining the decision.
    pub fn json_detail(
        &self,
        toggle_key: &str,
        user: &User,
        default_value: serde_json::Value,
    ) -> Detail<serde_json::Value> {
        self.detail(
            toggle_key,
            user,
            default_value.clone(),
            default_value,
            |value| Some(value.clone()),
        )
    }

    /// Report a custom event with an optional numeric value.
    pub fn track(&self, event_name: &str, user: &User, value: Option<f64>) {
        self.events
            .push(Event::Custom(CustomEvent::new(user, event_name, value)));
    }

    /// Manually trigger an events push.
    pub fn flush(&self) {
        self.events.flush();
    }

    /// Safely shut the client down: stop reporting, then the synchronizer,
    /// then drop the cached ruleset. No accepted event is lost.
    pub fn shutdown(self) {
        self.events.shutdown();
        if let Some(poller) = self.poller {
            if let Err(err) = poller.shutdown() {
                log::error!(target: "flagship", "failed to shut down the poller thread: {err}");
            }
        }
        self.store.clear();
    }

    fn detail<T>(
        &self,
        toggle_key: &str,
        user: &User,
        default_json: serde_json::Value,
        default_value: T,
        convert: impl Fn(&serde_json::Value) -> Option<T>,
    ) -> Detail<T> {
        let Some(snapshot) = self.store.snapshot() else {
            return Detail {
                value: default_value,
                rule_index: None,
                version: None,
                reason: "Repository uninitialized".to_owned(),
            };
        };

        let Some(toggle) = snapshot.toggles.get(toggle_key) else {
            return Detail {
                value: default_value,
                rule_index: None,
                version: None,
                reason: "Toggle not exist".to_owned(),
            };
        };

        let result = toggle.eval(
            user,
            &snapshot.toggles,
            &snapshot.segments,
            Some(&default_json),
            self.config.prerequisite_depth,
        );
        self.record(toggle, user, &result, snapshot.debug_until_time);

        log::trace!(target: "flagship",
                    toggle_key,
                    user_key:display = user.key(),
                    value:serde = result.value;
                    "evaluated a toggle");

        let (value, reason) = match result.value.as_ref().and_then(&convert) {
            Some(value) => (value, result.reason.clone()),
            None => {
                log::warn!(target: "flagship",
                           toggle_key;
                           "toggle value type does not match the requested type");
                (default_value, "Toggle data type mismatch".to_owned())
            }
        };

        Detail {
            value,
            rule_index: result.rule_index,
            version: Some(result.version),
            reason,
        }
    }

    fn record(
        &self,
        toggle: &Toggle,
        user: &User,
        result: &EvaluationResult,
        debug_until_time: Option<u64>,
    ) {
        self.events.push(Event::Access(AccessEvent::from_result(
            user,
            &toggle.key,
            toggle.track_access_events.unwrap_or(false),
            result,
        )));

        // Debug reporting is gated here, before the pipeline.
        if debug_until_time.is_some_and(|deadline| deadline >= unix_millis()) {
            self.events.push(Event::Debug(DebugEvent::from_result(
                user,
                &toggle.key,
                result,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClientConfig, Error, User};

    fn fixture_path() -> &'static str {
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/repo.json")
    }

    #[test]
    fn blank_sdk_key_is_rejected() {
        let result = ClientConfig::from_sdk_key("  ").to_client();
        assert!(matches!(result, Err(Error::MissingSdkKey)));
    }

    #[test]
    fn uninitialized_client_serves_defaults() {
        let client = ClientConfig::from_sdk_key("key")
            .local_file_mode("/no/such/repo.json")
            .to_client()
            .unwrap();

        assert!(!client.initialized());
        let user = User::new().with_key("u");
        assert!(!client.bool_value("feature_default_on", &user, false));

        let detail = client.bool_detail("feature_default_on", &user, true);
        assert!(detail.value);
        assert_eq!(detail.reason, "Repository uninitialized");

        client.shutdown();
    }

    #[test]
    fn file_mode_client_evaluates_toggles() {
        let _ = env_logger::builder().is_test(true).try_init();

        let client = ClientConfig::from_sdk_key("key")
            .local_file_mode(fixture_path())
            .to_client()
            .unwrap();
        assert!(client.initialized());

        let user = User::new().with_key("test_user_key");
        assert!(client.bool_value("feature_default_on", &user, false));

        let detail = client.bool_detail("no_such_toggle", &user, false);
        assert_eq!(detail.reason, "Toggle not exist");
        assert_eq!(detail.version, None);

        // Stored variation is a string; asking for a number falls back.
        let detail = client.number_detail("string_toggle", &user, 4.25);
        assert_eq!(detail.value, 4.25);
        assert_eq!(detail.reason, "Toggle data type mismatch");

        client.track("conversion", &user, Some(1.0));
        client.flush();
        client.shutdown();
    }
}
