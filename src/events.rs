//! Analytics events emitted for toggle evaluations.
//!
//! Three kinds of events flow through the pipeline: every evaluation folds
//! into aggregated access counters (and is optionally reported verbatim),
//! debug events carry the full decision while the server-side debug window
//! is open, and custom events are application-defined conversions.
use std::collections::HashMap;

use serde::Serialize;

use crate::eval::EvaluationResult;
use crate::user::User;

pub(crate) fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// An event queued for reporting. The `kind` tag and the field names are
/// part of the reporting wire contract.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Event {
    Access(AccessEvent),
    Custom(CustomEvent),
    Debug(DebugEvent),
}

/// One toggle evaluation outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEvent {
    /// Epoch millis, as a string.
    pub time: String,
    pub user: String,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub version: Option<u64>,
    pub variation_index: Option<usize>,
    pub rule_index: Option<usize>,
    /// Whether the toggle opted into verbatim reporting on top of the
    /// aggregated counters. Not part of the wire shape.
    #[serde(skip)]
    pub track_access_events: bool,
}

impl AccessEvent {
    pub fn from_result(
        user: &User,
        toggle_key: &str,
        track_access_events: bool,
        result: &EvaluationResult,
    ) -> AccessEvent {
        AccessEvent {
            time: unix_millis().to_string(),
            user: user.key().to_owned(),
            key: toggle_key.to_owned(),
            value: result.value.clone(),
            version: Some(result.version),
            variation_index: result.variation_index,
            rule_index: result.rule_index,
            track_access_events,
        }
    }
}

/// An application-defined conversion event, see `Client::track`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub time: String,
    pub user: String,
    pub name: String,
    pub value: Option<f64>,
}

impl CustomEvent {
    pub fn new(user: &User, name: impl Into<String>, value: Option<f64>) -> CustomEvent {
        CustomEvent {
            time: unix_millis().to_string(),
            user: user.key().to_owned(),
            name: name.into(),
            value,
        }
    }
}

/// A full evaluation trace, reported only while `debugUntilTime` has not
/// elapsed. The gating happens before the event reaches the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    pub time: String,
    pub user: String,
    pub user_detail: User,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub version: Option<u64>,
    pub variation_index: Option<usize>,
    pub rule_index: Option<usize>,
    pub reason: Option<String>,
}

impl DebugEvent {
    pub fn from_result(user: &User, toggle_key: &str, result: &EvaluationResult) -> DebugEvent {
        DebugEvent {
            time: unix_millis().to_string(),
            user: user.key().to_owned(),
            user_detail: user.clone(),
            key: toggle_key.to_owned(),
            value: result.value.clone(),
            version: Some(result.version),
            variation_index: result.variation_index,
            rule_index: result.rule_index,
            reason: Some(result.reason.clone()),
        }
    }
}

/// Folds access events into per-toggle counters, one counter per
/// `(version, variation index)` group.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummaryRecorder {
    pub counters: HashMap<String, Vec<AccessCounter>>,
    pub start_time: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessCounter {
    pub count: u64,
    pub value: Option<serde_json::Value>,
    pub version: Option<u64>,
    pub index: Option<usize>,
}

impl AccessCounter {
    fn is_group(&self, version: Option<u64>, index: Option<usize>) -> bool {
        self.version == version && self.index == index
    }
}

impl AccessSummaryRecorder {
    /// Fold one access event in. The first event of a reporting window
    /// stamps `start_time`; the first occurrence of a group records its
    /// value, version and index.
    pub fn add(&mut self, event: &AccessEvent) {
        if self.counters.is_empty() {
            self.start_time = unix_millis();
        }

        let counters = self.counters.entry(event.key.clone()).or_default();
        match counters
            .iter_mut()
            .find(|counter| counter.is_group(event.version, event.variation_index))
        {
            Some(counter) => counter.count += 1,
            None => counters.push(AccessCounter {
                count: 1,
                value: event.value.clone(),
                version: event.version,
                index: event.variation_index,
            }),
        }
    }

    /// Deep-copy the counters and stamp `end_time`, so in-flight mutation
    /// of the live recorder cannot race the send.
    pub fn snapshot(&self) -> AccessSummaryRecorder {
        AccessSummaryRecorder {
            counters: self.counters.clone(),
            start_time: self.start_time,
            end_time: unix_millis(),
        }
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }
}

/// The live set of pending telemetry: raw events plus aggregated access
/// counters. One instance is owned by the pipeline's consumer loop;
/// flushing snapshots-and-clears it.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRepository {
    pub events: Vec<Event>,
    pub access: AccessSummaryRecorder,
}

impl EventRepository {
    pub fn add(&mut self, event: Event) {
        match event {
            Event::Access(access) => {
                self.access.add(&access);
                if access.track_access_events {
                    self.events.push(Event::Access(access));
                }
            }
            other => self.events.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.access.counters.is_empty()
    }

    pub fn snapshot(&self) -> EventRepository {
        EventRepository {
            events: self.events.clone(),
            access: self.access.snapshot(),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.access.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AccessEvent, AccessSummaryRecorder, CustomEvent, Event, EventRepository};
    use crate::user::User;

    fn access_event(key: &str, version: u64, index: usize, track: bool) -> AccessEvent {
        AccessEvent {
            time: "123".to_owned(),
            user: "test_user".to_owned(),
            key: key.to_owned(),
            value: Some(json!("true")),
            version: Some(version),
            variation_index: Some(index),
            rule_index: Some(1),
            track_access_events: track,
        }
    }

    #[test]
    fn add_records_first_occurrence() {
        let mut recorder = AccessSummaryRecorder::default();
        recorder.add(&access_event("test_toggle", 1, 0, true));

        assert!(recorder.start_time > 0);
        assert_eq!(recorder.end_time, 0);

        let counter = &recorder.counters["test_toggle"][0];
        assert_eq!(counter.count, 1);
        assert_eq!(counter.value, Some(json!("true")));
        assert_eq!(counter.version, Some(1));
        assert_eq!(counter.index, Some(0));
    }

    #[test]
    fn add_increments_within_a_group_and_splits_across_groups() {
        let mut recorder = AccessSummaryRecorder::default();
        recorder.add(&access_event("t", 1, 0, false));
        recorder.add(&access_event("t", 1, 0, false));
        recorder.add(&access_event("t", 2, 0, false));
        recorder.add(&access_event("t", 1, 1, false));

        let counters = &recorder.counters["t"];
        assert_eq!(counters.len(), 3);
        assert_eq!(counters[0].count, 2);
        assert_eq!(counters[1].count, 1);
        assert_eq!(counters[2].count, 1);
    }

    #[test]
    fn snapshot_then_clear_leaves_an_empty_live_recorder() {
        let mut recorder = AccessSummaryRecorder::default();
        recorder.add(&access_event("t", 1, 0, false));
        let start_time = recorder.start_time;

        let snapshot = recorder.snapshot();
        recorder.clear();

        assert!(snapshot.end_time > 0);
        assert_eq!(snapshot.start_time, start_time);
        assert_eq!(snapshot.counters["t"][0].count, 1);
        assert!(recorder.counters.is_empty());
    }

    #[test]
    fn repository_folds_access_and_keeps_tracked_raw_events() {
        let mut repo = EventRepository::default();
        repo.add(Event::Access(access_event("untracked", 1, 0, false)));
        repo.add(Event::Access(access_event("tracked", 1, 0, true)));
        repo.add(Event::Custom(CustomEvent::new(
            &User::new().with_key("u"),
            "purchase",
            Some(9.99),
        )));

        // Both access events are counted, only the opted-in one is raw.
        assert_eq!(repo.access.counters.len(), 2);
        assert_eq!(repo.events.len(), 2);
        assert!(!repo.is_empty());

        repo.clear();
        assert!(repo.is_empty());
    }

    #[test]
    fn event_wire_shape() {
        let event = Event::Access(access_event("t", 3, 1, false));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "access");
        assert_eq!(json["time"], "123");
        assert_eq!(json["user"], "test_user");
        assert_eq!(json["key"], "t");
        assert_eq!(json["version"], 3);
        assert_eq!(json["variationIndex"], 1);
        assert_eq!(json["ruleIndex"], 1);
        // The tracking flag is pipeline-internal.
        assert!(json.get("trackAccessEvents").is_none());

        let custom = Event::Custom(CustomEvent::new(
            &User::new().with_key("u"),
            "signup",
            None,
        ));
        let json = serde_json::to_value(&custom).unwrap();
        assert_eq!(json["kind"], "custom");
        assert_eq!(json["name"], "signup");
    }

    #[test]
    fn batch_wire_shape() {
        let mut repo = EventRepository::default();
        repo.add(Event::Access(access_event("t", 1, 0, false)));
        let snapshot = repo.snapshot();

        let json = serde_json::to_value([&snapshot]).unwrap();
        let batch = &json[0];
        assert!(batch["events"].as_array().unwrap().is_empty());
        assert_eq!(batch["access"]["counters"]["t"][0]["count"], 1);
        assert!(batch["access"]["startTime"].as_u64().unwrap() > 0);
        assert!(batch["access"]["endTime"].as_u64().unwrap() > 0);
    }
}
