//! A background poller thread that periodically fetches the ruleset from
//! the server and refreshes the repository store.
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::{thread_rng, Rng};
use reqwest::{StatusCode, Url};

use crate::repository::Repository;
use crate::repository_store::RepositoryStore;
use crate::{Error, Result};

pub(crate) struct PollerThreadConfig {
    pub store: Arc<RepositoryStore>,
    pub synchronizer_url: String,
    pub server_sdk_key: String,
    pub interval: Duration,
}

const POLL_JITTER: Duration = Duration::from_secs(1);

/// The HTTP polling synchronizer.
///
/// Polls the server on a fixed, jittered interval and atomically refreshes
/// the [`RepositoryStore`]. Use [`Client::new`](crate::Client::new) to get
/// an instance of it.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` until the first sync attempt completes, then the
    /// outcome of the most recent attempt. Either way the first completed
    /// attempt releases everyone blocked in `wait_for_initialization`.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    pub(crate) fn start(config: PollerThreadConfig) -> Result<PollerThread> {
        // Buffer of 1 is enough: a second stop command can be dropped as
        // another thread has already stopped the poller.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let url = Url::parse(&config.synchronizer_url).map_err(Error::InvalidBaseUrl)?;

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value: Result<()>, first_attempt_only: bool| {
                let mut slot = result.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !first_attempt_only || slot.is_none() {
                    *slot = Some(value);
                }
                result.1.notify_all();
            };

            let client = reqwest::blocking::Client::new();

            std::thread::Builder::new()
                .name("flagship-sync".to_owned())
                .spawn(move || loop {
                    log::debug!(target: "flagship", "fetching new repository");
                    match fetch_repository(&client, &url, &config.server_sdk_key) {
                        Ok(repository) => {
                            config.store.refresh(Some(repository));
                            update_result(Ok(()), false);
                        }
                        Err(err @ Error::Unauthorized) => {
                            // Not recoverable, stop polling.
                            update_result(Err(err), false);
                            return;
                        }
                        Err(err) => {
                            log::warn!(target: "flagship", "error while fetching new repository: {err}");
                            // Transient: keep a previous success as the
                            // recorded outcome, but complete the first
                            // attempt so init waiters are released.
                            update_result(Err(err), true);
                        }
                    }

                    let timeout = jitter(config.interval, POLL_JITTER);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Timed out. Loop back to fetch again.
                        }
                        Ok(()) => {
                            log::debug!(target: "flagship", "poller thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The handle was dropped without an explicit
                            // stop; nothing left to serve.
                            return;
                        }
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first sync attempt completes.
    ///
    /// `timeout` bounds the wait; `None` waits forever. Timing out does
    /// not cancel the background synchronization — it only stops this
    /// caller's wait.
    pub fn wait_for_initialization(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            if let Some(result) = &*lock {
                return result.clone();
            }

            match deadline {
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::InitializationTimeout);
                    }
                    (lock, _) = self
                        .result
                        .1
                        .wait_timeout(lock, remaining)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // A send error means the thread already exited or a stop command
        // is already queued; both are fine.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

fn fetch_repository(
    client: &reqwest::blocking::Client,
    url: &Url,
    server_sdk_key: &str,
) -> Result<Repository> {
    let response = client
        .get(url.clone())
        .header("Authorization", server_sdk_key)
        .send()?;

    match response.status() {
        StatusCode::OK => response.json::<Repository>().map_err(|err| {
            log::warn!(target: "flagship", "failed to parse repository response body: {err}");
            Error::RepositoryParseError
        }),
        StatusCode::UNAUTHORIZED => {
            log::warn!(target: "flagship", "client is not authorized. Check your SDK key");
            Err(Error::Unauthorized)
        }
        _ => {
            let err = response
                .error_for_status()
                .expect_err("non-success status is an error");
            Err(Error::from(err))
        }
    }
}

/// Apply a random jitter to `interval` so a fleet of servers doesn't poll
/// in lockstep.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval + thread_rng().gen_range(Duration::ZERO..jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{jitter, PollerThread, PollerThreadConfig};
    use crate::repository_store::RepositoryStore;
    use crate::Error;

    #[test]
    fn jitter_is_additive_and_bounded() {
        let interval = Duration::from_secs(5);
        let bound = Duration::from_secs(1);
        for _ in 0..100 {
            let result = jitter(interval, bound);
            assert!(result >= interval);
            assert!(result < interval + bound);
        }
    }

    #[test]
    fn rejects_invalid_synchronizer_url() {
        let result = PollerThread::start(PollerThreadConfig {
            store: Arc::new(RepositoryStore::new()),
            synchronizer_url: "not a url".to_owned(),
            server_sdk_key: "key".to_owned(),
            interval: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn first_failed_attempt_releases_init_waiters() {
        // Nothing listens on this port, so the first poll fails fast; the
        // barrier must complete anyway instead of blocking the caller.
        let poller = PollerThread::start(PollerThreadConfig {
            store: Arc::new(RepositoryStore::new()),
            synchronizer_url: "http://127.0.0.1:9/api/server-sdk/toggles".to_owned(),
            server_sdk_key: "key".to_owned(),
            interval: Duration::from_secs(60),
        })
        .unwrap();

        let result = poller.wait_for_initialization(Some(Duration::from_secs(10)));
        assert!(result.is_err());
        assert!(!matches!(result, Err(Error::InitializationTimeout)));

        poller.shutdown().unwrap();
    }
}
