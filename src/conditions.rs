//! Condition matching.
//!
//! Every `(type, predicate)` pair maps to a [`Matcher`] through a static
//! table. Unknown pairs resolve to an always-false matcher so that a newer
//! server ruleset degrades gracefully instead of panicking or matching
//! everyone. No matcher failure may escape to the evaluator: malformed
//! regexes, numbers, versions and timestamps are all non-matches.
use std::collections::HashMap;

use regex::Regex;
use semver::Version;

use crate::repository::{Condition, Segment};
use crate::user::User;

const NUMBER_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Matcher {
    StringIsOneOf,
    StringIsNotAnyOf,
    StringStartsWith,
    StringDoesNotStartWith,
    StringEndsWith,
    StringDoesNotEndWith,
    StringContains,
    StringDoesNotContain,
    StringMatchesRegex,
    StringDoesNotMatchRegex,
    NumberEq,
    NumberNe,
    NumberGt,
    NumberGe,
    NumberLt,
    NumberLe,
    SemverEq,
    SemverNe,
    SemverGt,
    SemverGe,
    SemverLt,
    SemverLe,
    DatetimeAfter,
    DatetimeBefore,
    SegmentIsIn,
    SegmentIsNotIn,
    AlwaysFalse,
}

fn resolve(kind: &str, predicate: &str) -> Option<Matcher> {
    use Matcher::*;
    Some(match (kind, predicate) {
        ("string", "is one of") => StringIsOneOf,
        ("string", "is not any of") => StringIsNotAnyOf,
        ("string", "starts with") => StringStartsWith,
        ("string", "does not start with") => StringDoesNotStartWith,
        ("string", "ends with") => StringEndsWith,
        ("string", "does not end with") => StringDoesNotEndWith,
        ("string", "contains") => StringContains,
        ("string", "does not contain") => StringDoesNotContain,
        ("string", "matches regex") => StringMatchesRegex,
        ("string", "does not match regex") => StringDoesNotMatchRegex,
        ("number", "=") => NumberEq,
        ("number", "!=") => NumberNe,
        ("number", ">") => NumberGt,
        ("number", ">=") => NumberGe,
        ("number", "<") => NumberLt,
        ("number", "<=") => NumberLe,
        ("semver", "=") => SemverEq,
        ("semver", "!=") => SemverNe,
        ("semver", ">") => SemverGt,
        ("semver", ">=") => SemverGe,
        ("semver", "<") => SemverLt,
        ("semver", "<=") => SemverLe,
        ("datetime", "after") => DatetimeAfter,
        ("datetime", "before") => DatetimeBefore,
        ("segment", "is in") => SegmentIsIn,
        ("segment", "is not in") => SegmentIsNotIn,
        _ => return None,
    })
}

impl Condition {
    pub(crate) fn matcher(&self) -> Matcher {
        *self.matcher.get_or_init(|| {
            resolve(&self.kind, &self.predicate).unwrap_or_else(|| {
                log::error!(target: "flagship",
                            condition_type:display = self.kind,
                            predicate:display = self.predicate;
                            "invalid condition type and predicate, matcher will always return false");
                Matcher::AlwaysFalse
            })
        })
    }

    /// Whether the user satisfies the condition. Fail-closed: any internal
    /// failure is a non-match.
    pub(crate) fn matches(&self, user: &User, segments: &HashMap<String, Segment>) -> bool {
        let matcher = self.matcher();
        match matcher {
            Matcher::StringIsOneOf
            | Matcher::StringIsNotAnyOf
            | Matcher::StringStartsWith
            | Matcher::StringDoesNotStartWith
            | Matcher::StringEndsWith
            | Matcher::StringDoesNotEndWith
            | Matcher::StringContains
            | Matcher::StringDoesNotContain
            | Matcher::StringMatchesRegex
            | Matcher::StringDoesNotMatchRegex => user
                .attribute(&self.subject)
                .is_some_and(|target| match_string(matcher, &self.objects, target)),

            Matcher::NumberEq
            | Matcher::NumberNe
            | Matcher::NumberGt
            | Matcher::NumberGe
            | Matcher::NumberLt
            | Matcher::NumberLe => user
                .attribute(&self.subject)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .is_some_and(|target| match_number(matcher, &self.objects, target)),

            Matcher::SemverEq
            | Matcher::SemverNe
            | Matcher::SemverGt
            | Matcher::SemverGe
            | Matcher::SemverLt
            | Matcher::SemverLe => user
                .attribute(&self.subject)
                .and_then(|raw| Version::parse(raw.trim()).ok())
                .is_some_and(|target| match_semver(matcher, &self.objects, &target)),

            Matcher::DatetimeAfter | Matcher::DatetimeBefore => {
                let target = match user.attribute(&self.subject).map(str::trim) {
                    None | Some("") => chrono::Utc::now().timestamp(),
                    Some(raw) => match raw.parse::<i64>() {
                        Ok(seconds) => seconds,
                        Err(_) => return false,
                    },
                };
                match_datetime(matcher, &self.objects, target)
            }

            Matcher::SegmentIsIn => self
                .objects
                .iter()
                .any(|id| segments.get(id).is_some_and(|s| s.contains(user, segments))),
            // Deliberately NOT(all) rather than NOT(any): a user is "not
            // in" the listed segments unless they belong to every one.
            Matcher::SegmentIsNotIn => !self
                .objects
                .iter()
                .all(|id| segments.get(id).is_some_and(|s| s.contains(user, segments))),

            Matcher::AlwaysFalse => false,
        }
    }
}

fn match_string(matcher: Matcher, objects: &[String], target: &str) -> bool {
    match matcher {
        Matcher::StringIsOneOf => objects.iter().any(|o| o == target),
        Matcher::StringIsNotAnyOf => !objects.iter().any(|o| o == target),
        Matcher::StringStartsWith => objects.iter().any(|o| target.starts_with(o.as_str())),
        Matcher::StringDoesNotStartWith => objects.iter().all(|o| !target.starts_with(o.as_str())),
        Matcher::StringEndsWith => objects.iter().any(|o| target.ends_with(o.as_str())),
        Matcher::StringDoesNotEndWith => objects.iter().all(|o| !target.ends_with(o.as_str())),
        Matcher::StringContains => objects.iter().any(|o| target.contains(o.as_str())),
        Matcher::StringDoesNotContain => objects.iter().all(|o| !target.contains(o.as_str())),
        // A pattern that fails to compile fails the condition closed, for
        // the negated predicate as well.
        Matcher::StringMatchesRegex => objects
            .iter()
            .any(|o| Regex::new(o).map(|re| re.is_match(target)).unwrap_or(false)),
        Matcher::StringDoesNotMatchRegex => objects
            .iter()
            .all(|o| Regex::new(o).map(|re| !re.is_match(target)).unwrap_or(false)),
        _ => false,
    }
}

fn match_number(matcher: Matcher, objects: &[String], target: f64) -> bool {
    let Some(operands) = parse_all(objects, |raw| raw.trim().parse::<f64>().ok()) else {
        return false;
    };
    match matcher {
        Matcher::NumberEq => operands.iter().any(|o| (target - o).abs() < NUMBER_TOLERANCE),
        Matcher::NumberNe => operands.iter().all(|o| (target - o).abs() >= NUMBER_TOLERANCE),
        Matcher::NumberGt => operands.iter().any(|o| target > *o),
        Matcher::NumberGe => operands.iter().any(|o| target >= *o),
        Matcher::NumberLt => operands.iter().any(|o| target < *o),
        Matcher::NumberLe => operands.iter().any(|o| target <= *o),
        _ => false,
    }
}

fn match_semver(matcher: Matcher, objects: &[String], target: &Version) -> bool {
    let Some(operands) = parse_all(objects, |raw| Version::parse(raw.trim()).ok()) else {
        return false;
    };
    match matcher {
        Matcher::SemverEq => operands.iter().any(|o| target == o),
        Matcher::SemverNe => operands.iter().all(|o| target != o),
        Matcher::SemverGt => operands.iter().any(|o| target > o),
        Matcher::SemverGe => operands.iter().any(|o| target >= o),
        Matcher::SemverLt => operands.iter().any(|o| target < o),
        Matcher::SemverLe => operands.iter().any(|o| target <= o),
        _ => false,
    }
}

fn match_datetime(matcher: Matcher, objects: &[String], target: i64) -> bool {
    let Some(operands) = parse_all(objects, |raw| raw.trim().parse::<i64>().ok()) else {
        return false;
    };
    match matcher {
        // Any threshold satisfies, for both directions.
        Matcher::DatetimeAfter => operands.iter().any(|o| target >= *o),
        Matcher::DatetimeBefore => operands.iter().any(|o| target < *o),
        _ => false,
    }
}

/// Parse every operand or fail the whole condition: a malformed operand is
/// a data error, not a wildcard.
fn parse_all<T>(objects: &[String], parse: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    objects.iter().map(|o| parse(o)).collect()
}
