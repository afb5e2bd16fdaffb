//! Toggle evaluation.
//!
//! Evaluation is a pure function over `(user, snapshot)`: disabled check,
//! prerequisite resolution, first-match rule scan, default fallback. It
//! never panics and never surfaces an error to application code; every
//! internal failure degrades to the caller's default value with a reason
//! explaining the decision.
use std::collections::HashMap;
use std::fmt;

use crate::bucketer::{Bucketer, Sha1Bucketer};
use crate::repository::{Rule, Segment, SegmentRule, Serve, Split, Toggle};
use crate::user::User;

/// Outcome of a single toggle evaluation. Ephemeral, one per call.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// The resolved variation, or the caller-supplied default.
    pub value: Option<serde_json::Value>,
    pub version: u64,
    /// Which rule matched; `None` for the default and disabled payouts.
    pub rule_index: Option<usize>,
    pub variation_index: Option<usize>,
    /// Human-readable explanation of the decision.
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HitResult {
    pub(crate) hit: bool,
    pub(crate) index: Option<usize>,
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PrerequisiteFailure {
    DepthOverflow,
    NotFound(String),
    Cycle(String),
}

impl fmt::Display for PrerequisiteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrerequisiteFailure::DepthOverflow => write!(f, "Prerequisite depth overflow"),
            PrerequisiteFailure::NotFound(key) => write!(f, "Prerequisite not exist: {key}"),
            PrerequisiteFailure::Cycle(key) => write!(f, "Prerequisite cycle at: {key}"),
        }
    }
}

impl Toggle {
    /// Evaluate the toggle for the given user against a snapshot.
    ///
    /// `max_depth` is the prerequisite depth budget: a budget of `N`
    /// permits exactly `N` levels of chained dependency. Unmet
    /// prerequisites, missing dependencies and budget exhaustion all route
    /// to the default serve with a reason naming the failure.
    pub fn eval(
        &self,
        user: &User,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        default_value: Option<&serde_json::Value>,
        max_depth: usize,
    ) -> EvaluationResult {
        let mut path = Vec::new();
        match self.eval_internal(user, toggles, segments, default_value, max_depth, &mut path) {
            Ok(result) => result,
            Err(failure) => {
                log::warn!(target: "flagship",
                           toggle_key:display = self.key;
                           "prerequisite resolution failed: {failure}");
                self.hit_value(
                    self.default_serve.eval_index(user, &self.key),
                    default_value,
                    None,
                    Some(failure.to_string()),
                )
            }
        }
    }

    fn eval_internal(
        &self,
        user: &User,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        default_value: Option<&serde_json::Value>,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<EvaluationResult, PrerequisiteFailure> {
        if !self.enabled {
            return Ok(self.hit_value(
                self.disabled_serve.eval_index(user, &self.key),
                default_value,
                None,
                Some("Toggle disabled.".to_owned()),
            ));
        }

        if depth == 0 {
            return Err(PrerequisiteFailure::DepthOverflow);
        }

        if !self.meets_prerequisites(user, toggles, segments, depth, path)? {
            return Ok(self.hit_value(
                self.default_serve.eval_index(user, &self.key),
                default_value,
                None,
                Some("Default rule hit. Prerequisite not met.".to_owned()),
            ));
        }

        let mut warning = None;
        for (i, rule) in self.rules.iter().enumerate() {
            let hit = rule.hit(user, segments, &self.key);
            if hit.hit {
                return Ok(self.hit_value(hit, default_value, Some(i), None));
            }
            warning = hit.reason;
        }

        let hit = self.default_serve.eval_index(user, &self.key);
        let reason = format!("Default rule hit. {}", warning.as_deref().unwrap_or(""));
        Ok(self.hit_value(hit, default_value, None, Some(reason)))
    }

    /// All prerequisites must resolve to their required value (AND). The
    /// depth budget is the primary guard against dependency graphs that
    /// never bottom out; the evaluation path doubles as a visited set so
    /// cycles fail fast instead of burning the whole budget.
    fn meets_prerequisites(
        &self,
        user: &User,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<bool, PrerequisiteFailure> {
        if self.prerequisites.is_empty() {
            return Ok(true);
        }

        path.push(self.key.clone());
        let met = self.check_prerequisites(user, toggles, segments, depth, path);
        path.pop();
        met
    }

    fn check_prerequisites(
        &self,
        user: &User,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<bool, PrerequisiteFailure> {
        for prerequisite in &self.prerequisites {
            if path.iter().any(|key| *key == prerequisite.key) {
                return Err(PrerequisiteFailure::Cycle(prerequisite.key.clone()));
            }

            let Some(toggle) = toggles.get(&prerequisite.key) else {
                return Err(PrerequisiteFailure::NotFound(self.key.clone()));
            };

            let eval = toggle.eval_internal(user, toggles, segments, None, depth - 1, path)?;
            let Some(value) = eval.value else {
                return Ok(false);
            };

            // Values compare by canonical JSON form, so `1` and `1.0` are
            // distinct while object key order is not.
            let matches = match (
                serde_json::to_string(&value),
                serde_json::to_string(&prerequisite.value),
            ) {
                (Ok(actual), Ok(expected)) => actual == expected,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn hit_value(
        &self,
        hit: HitResult,
        default_value: Option<&serde_json::Value>,
        rule_index: Option<usize>,
        reason_override: Option<String>,
    ) -> EvaluationResult {
        let mut value = default_value.cloned();
        let mut reason = hit.reason.clone().unwrap_or_default();

        if let Some(index) = hit.index {
            match self.variations.get(index) {
                Some(variation) => {
                    value = Some(variation.clone());
                    if let Some(i) = rule_index {
                        reason = format!("Rule {i} hit");
                    }
                }
                None => {
                    // Out-of-range indices are a data error in the
                    // ruleset; degrade to the default value.
                    log::warn!(target: "flagship",
                               toggle_key:display = self.key,
                               variation_index = index;
                               "variation index out of range, serving default value");
                    reason = format!("Variation {index} not found, use default value.");
                    return EvaluationResult {
                        value,
                        version: self.version,
                        rule_index,
                        variation_index: Some(index),
                        reason,
                    };
                }
            }
        }

        EvaluationResult {
            value,
            version: self.version,
            rule_index,
            variation_index: hit.index,
            reason: reason_override.unwrap_or(reason),
        }
    }
}

impl Rule {
    /// All conditions must match (AND), short-circuiting on the first
    /// non-match. A condition whose subject attribute is absent is a
    /// non-match carrying a warning naming the attribute; segment and
    /// datetime conditions source their own values and skip that check.
    pub(crate) fn hit(
        &self,
        user: &User,
        segments: &HashMap<String, Segment>,
        toggle_key: &str,
    ) -> HitResult {
        for condition in &self.conditions {
            if condition.kind != "segment"
                && condition.kind != "datetime"
                && !user.has_attribute(&condition.subject)
            {
                return HitResult {
                    hit: false,
                    index: None,
                    reason: Some(format!(
                        "Warning: User with key '{}' does not have attribute name '{}'",
                        user.key(),
                        condition.subject
                    )),
                };
            }

            if !condition.matches(user, segments) {
                return HitResult::default();
            }
        }

        self.serve.eval_index(user, toggle_key)
    }
}

impl SegmentRule {
    pub(crate) fn hit(&self, user: &User, segments: &HashMap<String, Segment>) -> HitResult {
        for condition in &self.conditions {
            if condition.kind != "segment"
                && condition.kind != "datetime"
                && !user.has_attribute(&condition.subject)
            {
                return HitResult {
                    hit: false,
                    index: None,
                    reason: Some(format!(
                        "Warning: User with key '{}' does not have attribute name '{}'",
                        user.key(),
                        condition.subject
                    )),
                };
            }

            if !condition.matches(user, segments) {
                return HitResult::default();
            }
        }

        HitResult {
            hit: true,
            index: None,
            reason: None,
        }
    }
}

impl Segment {
    /// Membership is the OR across the segment's rules.
    pub fn contains(&self, user: &User, segments: &HashMap<String, Segment>) -> bool {
        self.rules.iter().any(|rule| rule.hit(user, segments).hit)
    }
}

impl Serve {
    pub(crate) fn eval_index(&self, user: &User, toggle_key: &str) -> HitResult {
        match self {
            Serve::Select { select } => HitResult {
                hit: true,
                index: Some(*select),
                reason: None,
            },
            Serve::Rollout { split } => split.find_index(user, toggle_key),
        }
    }
}

impl Split {
    /// Bucket the user and pick the first distribution group covering the
    /// bucket. A bucket outside every group is a non-hit: that traffic is
    /// deliberately held back from the rollout.
    pub(crate) fn find_index(&self, user: &User, toggle_key: &str) -> HitResult {
        let hash_key = match self.bucket_by.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(attribute) => match user.attribute(attribute) {
                Some(value) => value,
                None => {
                    return HitResult {
                        hit: false,
                        index: None,
                        reason: Some(format!(
                            "Warning: User with key {} does not have attribute name {}",
                            user.key(),
                            attribute
                        )),
                    }
                }
            },
            None => user.key(),
        };

        let salt = self
            .salt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(toggle_key);
        let bucket = Sha1Bucketer.bucket(hash_key, salt);

        match self
            .distribution
            .iter()
            .position(|group| group.iter().any(|range| range.contains(bucket)))
        {
            Some(index) => HitResult {
                hit: true,
                index: Some(index),
                reason: Some(format!("Selected {index} percentage group")),
            },
            None => HitResult::default(),
        }
    }
}
