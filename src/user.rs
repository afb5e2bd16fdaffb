use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// A collection of attributes that can affect toggle evaluation, usually
/// corresponding to a user of your application.
///
/// The identity key drives percentage rollouts, so it should be stable
/// across sessions of the same user. A freshly constructed `User` gets a
/// clock-derived key, which is only suitable for fully anonymous traffic.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    key: String,
    attributes: HashMap<String, String>,
}

impl User {
    /// Creates a new user whose key is the current high-resolution timestamp.
    pub fn new() -> User {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        User {
            key: nanos.to_string(),
            attributes: HashMap::new(),
        }
    }

    /// Sets a stable identity key, used for percentage rollouts.
    pub fn with_key(mut self, key: impl Into<String>) -> User {
        self.key = key.into();
        self
    }

    /// Adds an attribute to the user.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> User {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The user's unique identifier.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Looks up a single attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Checks whether the user has the attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Inserts or replaces an attribute on an existing user.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// All attributes of the user.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }
}

impl Default for User {
    fn default() -> User {
        User::new()
    }
}
