//! Flow context properties carried across session boundaries.
//!
//! Context properties come in two namespaces: user properties (set by flow
//! code, passed through untouched) and platform properties (keys under the
//! `corda.` namespace, rewritten when they cross from an initiator to an
//! initiated flow).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix of every platform-namespaced context key.
pub const PLATFORM_PREFIX: &str = "corda.";

/// Prefix marking a platform key that originated on the initiating side.
pub const INITIATOR_PREFIX: &str = "corda.initiator.";

/// An ordered set of string key/value context properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextProperties(BTreeMap<String, String>);

impl ContextProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert a property, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Overwrite every key present in `other` with its value.
    pub fn merge_from(&mut self, other: &ContextProperties) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattened plain-map view.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContextProperties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Context of an initiated flow, derived from the properties its initiator sent.
///
/// Never persisted on its own: user and platform properties are stored on the
/// checkpoint start context, session properties on the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalContext {
    pub user_properties: ContextProperties,
    pub platform_properties: ContextProperties,
    /// Flattened view of `platform_properties` exposed to initiated flow code.
    pub session_properties: BTreeMap<String, String>,
}
