//! A server-side feature toggle SDK: given a user's attributes and a
//! locally cached ruleset, it deterministically decides which variation of
//! a feature the user receives, without a round-trip to a server.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] created from a [`ClientConfig`].
//! The client evaluates toggles for a [`User`] — a stable identity key
//! plus key-value attributes — through typed getters
//! ([`bool_value`](Client::bool_value), [`string_value`](Client::string_value),
//! [`number_value`](Client::number_value), [`json_value`](Client::json_value))
//! and `*_detail` variants that additionally explain the decision.
//!
//! Under the hood the crate is a set of building blocks:
//!
//! - [`repository::Repository`] is an immutable ruleset snapshot: toggles,
//!   segments and the debug-event deadline, exactly as served on the wire.
//! - [`repository_store::RepositoryStore`] is the thread-safe holder of
//!   the currently active snapshot. Whenever the ruleset changes, the
//!   snapshot is replaced completely; readers keep using the snapshot they
//!   grabbed, so an evaluation is always internally consistent.
//! - [`eval`] turns `(user, snapshot)` into an
//!   [`EvaluationResult`](eval::EvaluationResult): enablement check,
//!   prerequisite resolution, first-match rule scan, percentage rollout
//!   via [`bucketer`], default fallback.
//! - [`events`] and [`event_processor`] make up the reporting pipeline: a
//!   bounded queue, a single consumer that folds evaluations into access
//!   summaries, a periodic flush and asynchronous delivery.
//! - [`poller::PollerThread`] keeps the store fresh by polling the server;
//!   [`file_sync`] loads a snapshot from a local file instead.
//!
//! # Error handling
//!
//! Errors are represented by the [`Error`] enum, and only configuration
//! and construction paths produce them. Evaluation never fails and never
//! panics: malformed rules, unknown predicates, missing toggles and type
//! mismatches all degrade to the caller's default value, with the reason
//! recorded in the corresponding `Detail`.
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade under
//! the `flagship` target. Hook up any `log`-compatible logger to see
//! evaluation traces, sync lifecycle and degraded-mode warnings.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod bucketer;
pub mod eval;
pub mod event_processor;
pub mod events;
pub mod file_sync;
pub mod poller;
pub mod repository;
pub mod repository_store;

mod client;
mod conditions;
mod config;
mod error;
mod user;

pub use client::{Client, Detail};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use user::User;
