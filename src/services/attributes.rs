//! Object attributes derived from request headers.

use crate::models::object::{ATTRIBUTE_FILE_NAME, ATTRIBUTE_TIMESTAMP, Attribute};
use axum::http::HeaderMap;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

pub const DEFAULT_ATTRIBUTE_PREFIX: &str = "x-attribute-";

/// Allow/deny filter turning headers into attribute key/value pairs.
///
/// A header is kept when its name starts with `prefix`; the prefix is
/// stripped and the remainder becomes the attribute key. Keys listed in
/// `deny` are dropped, as are empty keys and empty or non-UTF-8 values.
#[derive(Clone, Debug)]
pub struct HeaderFilter {
    prefix: String,
    deny: HashSet<String>,
}

impl Default for HeaderFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ATTRIBUTE_PREFIX, std::iter::empty::<String>())
    }
}

impl HeaderFilter {
    pub fn new<I, S>(prefix: impl Into<String>, deny: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into().to_ascii_lowercase(),
            deny: deny
                .into_iter()
                .map(|k| k.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Apply the filter. For repeated headers the last value wins.
    pub fn filter(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        for (name, value) in headers {
            let Some(key) = name.as_str().strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            if key.is_empty() || self.deny.contains(key) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                debug!(header = %name, "skipping attribute header with non-UTF-8 value");
                continue;
            };
            if value.is_empty() {
                continue;
            }
            debug!(key, value, "add attribute to result object");
            result.insert(key.to_string(), value.to_string());
        }
        result
    }
}

/// Build the final attribute list for an object.
///
/// Filtered header attributes come first in key order, then `filename`
/// (from the multipart part) and `timestamp` (when `default_timestamp` is
/// set) are appended unless the caller supplied them.
pub fn derive_attributes(
    filtered: &BTreeMap<String, String>,
    file_name: &str,
    default_timestamp: bool,
    now: i64,
) -> Vec<Attribute> {
    let mut attributes: Vec<Attribute> = filtered
        .iter()
        .map(|(k, v)| Attribute::new(k.as_str(), v.as_str()))
        .collect();

    if !filtered.contains_key(ATTRIBUTE_FILE_NAME) {
        attributes.push(Attribute::new(ATTRIBUTE_FILE_NAME, file_name));
    }
    if default_timestamp && !filtered.contains_key(ATTRIBUTE_TIMESTAMP) {
        attributes.push(Attribute::new(ATTRIBUTE_TIMESTAMP, now.to_string()));
    }
    attributes
}
