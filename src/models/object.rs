//! Represents an object descriptor as sent to the storage network.

use super::ids::{ContainerId, OwnerId};
use serde::{Deserialize, Serialize};

/// Attribute key carrying the original file name.
pub const ATTRIBUTE_FILE_NAME: &str = "filename";

/// Attribute key carrying the creation time in Unix seconds.
pub const ATTRIBUTE_TIMESTAMP: &str = "timestamp";

/// Key-value metadata attached to an object at creation time.
///
/// Keys are not unique at the type level; the gateway only guarantees that
/// the reserved keys above are synthesized at most once.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Object descriptor: everything about the object except its payload.
#[derive(Clone, Debug)]
pub struct ObjectHeader {
    pub container_id: ContainerId,
    pub owner_id: OwnerId,
    pub attributes: Vec<Attribute>,
}

impl ObjectHeader {
    /// Looks up the first attribute with the given key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Object header row persisted by the local backend. Only read back in tests;
/// the gateway itself never serves objects.
#[cfg(test)]
#[derive(Serialize, Deserialize, Clone, sqlx::FromRow, Debug)]
pub struct StoredObject {
    /// Hex object id.
    pub id: String,

    /// Hex container id.
    pub container_id: String,

    pub owner_id: String,

    /// Size of the payload in bytes.
    pub payload_size: i64,

    /// SHA-256 of the payload, hex.
    pub payload_hash: String,

    /// Session that created the object.
    pub session_id: uuid::Uuid,

    pub created_at: chrono::DateTime<chrono::Utc>,
}
