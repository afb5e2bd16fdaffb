//! Wire model for ruleset snapshots.
//!
//! Field names are part of the wire contract shared with the server and
//! every other SDK; they must not be renamed. A [`Repository`] is
//! constructed wholesale by deserializing a ruleset document, is immutable
//! afterwards, and is dropped when the snapshot it belongs to is replaced.
use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::conditions::Matcher;

/// A full ruleset snapshot: toggles, segments and the debug-event deadline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
    #[serde(default)]
    pub toggles: HashMap<String, Toggle>,
    /// Deadline (epoch millis) until which evaluations also produce debug
    /// events. Absent or elapsed means no debug reporting.
    #[serde(default)]
    pub debug_until_time: Option<u64>,
}

/// A feature toggle: enablement, targeting rules and variation values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    pub key: String,
    pub enabled: bool,
    /// Whether raw access events are reported verbatim in addition to the
    /// aggregated counters.
    #[serde(default)]
    pub track_access_events: Option<bool>,
    #[serde(default)]
    pub last_modified: u64,
    pub version: u64,
    pub disabled_serve: Serve,
    pub default_serve: Serve,
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Possible output values, selected by index. Values are heterogeneous
    /// by design (booleans, strings, numbers or JSON documents).
    pub variations: Vec<serde_json::Value>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub for_client: bool,
}

/// A dependency on another toggle resolving to a specific value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub key: String,
    pub value: serde_json::Value,
}

/// A reusable, named group of users defined by membership rules.
///
/// Membership is the logical OR across the segment's rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub unique_id: String,
    pub version: u64,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

/// Conditions ANDed together; no payout of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRule {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// An ordered condition list plus a payout decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub serve: Serve,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A single predicate over a user attribute, a segment or the clock.
///
/// `kind` and `predicate` stay raw strings: an unknown pair must degrade to
/// an always-false matcher instead of failing the whole snapshot parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute name; empty for segment and datetime conditions, which
    /// source their own values.
    #[serde(default)]
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub predicate: String,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(skip)]
    pub(crate) matcher: OnceLock<Matcher>,
}

impl Condition {
    /// Build a condition; mostly useful in tests and tools.
    pub fn new(
        kind: impl Into<String>,
        predicate: impl Into<String>,
        subject: impl Into<String>,
        objects: Vec<String>,
    ) -> Condition {
        Condition {
            subject: subject.into(),
            kind: kind.into(),
            predicate: predicate.into(),
            objects,
            matcher: OnceLock::new(),
        }
    }
}

/// A payout decision: either a fixed variation or a percentage split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Serve {
    /// Always serve the variation at this index.
    Select { select: usize },
    /// Bucket the user and serve by distribution group.
    Rollout { split: Split },
}

/// Percentage-rollout configuration bucketing users via the hash function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// Groups of half-open bucket ranges over `[0, 10000)`; the index of
    /// the first group covering the user's bucket is the variation index.
    pub distribution: Vec<Vec<BucketRange>>,
    /// Attribute to hash instead of the user's identity key.
    #[serde(default)]
    pub bucket_by: Option<String>,
    /// Salt mixed into the hash; defaults to the toggle key.
    #[serde(default)]
    pub salt: Option<String>,
}

/// Half-open range `[low, high)` over the bucket space, serialized as a
/// two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRange(pub u32, pub u32);

impl BucketRange {
    pub(crate) fn contains(&self, bucket: u32) -> bool {
        self.0 <= bucket && bucket < self.1
    }
}
