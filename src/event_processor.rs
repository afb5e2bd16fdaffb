//! The background event pipeline.
//!
//! Producers push actions onto a bounded queue; a single dedicated
//! consumer thread drains it continuously, folding events into the live
//! [`EventRepository`] and handing flush snapshots to detached sender
//! threads. A timer thread injects a flush every few seconds. When the
//! queue is full the action is dropped with a warning — the pipeline sheds
//! load rather than blocking the caller's evaluation path.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::events::{Event, EventRepository};

const EVENT_QUEUE_CAPACITY: usize = 10_000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

enum EventAction {
    Event(Box<Event>),
    Flush,
}

/// Handle to the pipeline. Cheap to share behind the client; all real work
/// happens on the pipeline's own threads.
pub struct EventProcessor {
    sender: SyncSender<EventAction>,
    closed: Arc<AtomicBool>,
    timer_stop: SyncSender<()>,
    timer: JoinHandle<()>,
    consumer: JoinHandle<()>,
    send_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventProcessor {
    /// Spawn the consumer and timer threads.
    pub fn start(
        events_url: impl Into<String>,
        server_sdk_key: impl Into<String>,
    ) -> std::io::Result<EventProcessor> {
        let events_url = events_url.into();
        let server_sdk_key = server_sdk_key.into();

        let (sender, receiver) = sync_channel::<EventAction>(EVENT_QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let send_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let consumer = {
            let send_tasks = Arc::clone(&send_tasks);
            std::thread::Builder::new()
                .name("flagship-events".to_owned())
                .spawn(move || consume(receiver, events_url, server_sdk_key, send_tasks))?
        };

        let (timer_stop, timer_stop_receiver) = sync_channel::<()>(1);
        let timer = {
            let sender = sender.clone();
            std::thread::Builder::new()
                .name("flagship-flush-timer".to_owned())
                .spawn(move || loop {
                    match timer_stop_receiver.recv_timeout(FLUSH_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {
                            // A full queue is already backlogged with work
                            // that will flush; dropping the tick is fine.
                            let _ = sender.try_send(EventAction::Flush);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                })?
        };

        Ok(EventProcessor {
            sender,
            closed,
            timer_stop,
            timer,
            consumer,
            send_tasks,
        })
    }

    /// Queue an event for reporting. Never blocks: when the pipeline is
    /// saturated or already shut down the event is dropped.
    pub fn push(&self, event: Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        match self.sender.try_send(EventAction::Event(Box::new(event))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "flagship", "event processing is busy, some events will be dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Queue a manual flush.
    pub fn flush(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        match self.sender.try_send(EventAction::Flush) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "flagship", "event processing is busy, flush dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Tear the pipeline down without losing accepted events: close the
    /// intake, queue a final flush, stop the timer, let the consumer drain
    /// the queue, then wait for every outstanding send.
    pub fn shutdown(self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.sender.try_send(EventAction::Flush);

        let _ = self.timer_stop.try_send(());
        let _ = self.timer.join();

        // With the timer gone this is the last sender; dropping it lets
        // the consumer finish draining and exit.
        drop(self.sender);
        if self.consumer.join().is_err() {
            log::error!(target: "flagship", "event consumer thread panicked");
        }

        let tasks = {
            let mut send_tasks = self
                .send_tasks
                .lock()
                .expect("thread holding send-task list should not panic");
            std::mem::take(&mut *send_tasks)
        };
        for task in tasks {
            let _ = task.join();
        }
    }
}

fn consume(
    receiver: Receiver<EventAction>,
    events_url: String,
    server_sdk_key: String,
    send_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let http = reqwest::blocking::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build();
    let http = match http {
        Ok(http) => http,
        Err(err) => {
            log::error!(target: "flagship", "failed to build event reporting client: {err}");
            return;
        }
    };

    let mut repository = EventRepository::default();
    let mut batch = Vec::new();

    loop {
        // Block for one action, then drain whatever else is ready so a
        // busy queue is handled in batches instead of per-wakeup.
        let first = match receiver.recv() {
            Ok(action) => action,
            Err(_) => break,
        };
        batch.push(first);
        while batch.len() < EVENT_QUEUE_CAPACITY {
            match receiver.try_recv() {
                Ok(action) => batch.push(action),
                Err(_) => break,
            }
        }

        for action in batch.drain(..) {
            match action {
                EventAction::Event(event) => repository.add(*event),
                EventAction::Flush => {
                    flush_repository(&mut repository, &http, &events_url, &server_sdk_key, &send_tasks)
                }
            }
        }
    }

    // The channel disconnected during shutdown. If the final flush was
    // dropped by a saturated queue, whatever is left still goes out.
    flush_repository(&mut repository, &http, &events_url, &server_sdk_key, &send_tasks);

    log::debug!(target: "flagship", "event consumer shut down");
}

fn flush_repository(
    repository: &mut EventRepository,
    http: &reqwest::blocking::Client,
    events_url: &str,
    server_sdk_key: &str,
    send_tasks: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    if repository.is_empty() {
        return;
    }

    let snapshot = repository.snapshot();
    repository.clear();

    let http = http.clone();
    let events_url = events_url.to_owned();
    let server_sdk_key = server_sdk_key.to_owned();
    let spawned = std::thread::Builder::new()
        .name("flagship-event-sender".to_owned())
        .spawn(move || send_events(&http, &events_url, &server_sdk_key, &snapshot));

    match spawned {
        Ok(handle) => send_tasks
            .lock()
            .expect("thread holding send-task list should not panic")
            .push(handle),
        Err(err) => {
            log::error!(target: "flagship", "failed to spawn event sender: {err}");
        }
    }
}

fn send_events(
    http: &reqwest::blocking::Client,
    events_url: &str,
    server_sdk_key: &str,
    snapshot: &EventRepository,
) {
    // The endpoint takes a list of batches; a flush produces one.
    let result = http
        .post(events_url)
        .header("Authorization", server_sdk_key)
        .json(&[snapshot])
        .send();

    match result {
        Ok(response) if !response.status().is_success() => {
            log::error!(target: "flagship",
                        status:display = response.status();
                        "event report request failed");
        }
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "flagship", "unexpected error from event sender: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::EventProcessor;
    use crate::events::{AccessEvent, CustomEvent, Event};
    use crate::user::User;

    fn access(key: &str) -> Event {
        Event::Access(AccessEvent {
            time: "1".to_owned(),
            user: "u".to_owned(),
            key: key.to_owned(),
            value: Some(json!(true)),
            version: Some(1),
            variation_index: Some(0),
            rule_index: None,
            track_access_events: false,
        })
    }

    // The reporting endpoint doesn't exist in tests; sends fail fast and
    // are only logged, which is exactly the production behavior for an
    // unreachable collector.
    #[test]
    fn shutdown_drains_without_hanging() {
        let _ = env_logger::builder().is_test(true).try_init();

        let processor = EventProcessor::start("http://127.0.0.1:9/events", "key").unwrap();
        for i in 0..100 {
            processor.push(access(&format!("toggle-{i}")));
        }
        processor.push(Event::Custom(CustomEvent::new(
            &User::new().with_key("u"),
            "conversion",
            None,
        )));
        processor.flush();
        processor.shutdown();
    }

    #[test]
    fn flush_of_empty_pipeline_is_a_no_op() {
        let processor = EventProcessor::start("http://127.0.0.1:9/events", "key").unwrap();
        processor.flush();
        processor.shutdown();
    }
}
