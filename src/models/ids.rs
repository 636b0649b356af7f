//! Identifiers used to address containers, objects and owners.
//!
//! Container and object identifiers are 32-byte digests rendered as hex.
//! Owner identities are opaque strings issued by the storage network.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("identifier must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("identifier is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("owner id must not be empty")]
    EmptyOwner,
    #[error("owner id contains whitespace or control characters")]
    InvalidOwner,
}

fn parse_digest(s: &str) -> Result<[u8; DIGEST_LEN], IdError> {
    if s.len() != DIGEST_LEN * 2 {
        return Err(IdError::InvalidLength {
            expected: DIGEST_LEN * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; DIGEST_LEN];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

/// Identifier of a logical container (bucket) in the storage network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContainerId([u8; DIGEST_LEN]);

impl ContainerId {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for ContainerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_digest(s).map(Self)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Storage-assigned identifier of an object, unique within its container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId([u8; DIGEST_LEN]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_digest(s).map(Self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Acting owner identity of an object.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OwnerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::EmptyOwner);
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdError::InvalidOwner);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for OwnerId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full address of a stored object.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Address {
    pub container_id: ContainerId,
    pub object_id: ObjectId,
}

impl Address {
    pub fn new(container_id: ContainerId, object_id: ObjectId) -> Self {
        Self {
            container_id,
            object_id,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "9f2c4e1a7b3d5f60817263544536271809fadbecdfcebda9f8e7d6c5b4a39281";

    #[test]
    fn container_id_roundtrips_through_display() {
        let cid: ContainerId = CID.parse().unwrap();
        assert_eq!(cid.to_string(), CID);
    }

    #[test]
    fn container_id_accepts_uppercase_hex() {
        let cid: ContainerId = CID.to_uppercase().parse().unwrap();
        assert_eq!(cid.to_string(), CID);
    }

    #[test]
    fn container_id_rejects_wrong_length() {
        let err = "abcd".parse::<ContainerId>().unwrap_err();
        assert_eq!(
            err,
            IdError::InvalidLength {
                expected: 64,
                actual: 4
            }
        );
    }

    #[test]
    fn container_id_rejects_non_hex() {
        let bad = format!("zz{}", &CID[2..]);
        assert!(matches!(
            bad.parse::<ContainerId>(),
            Err(IdError::InvalidHex(_))
        ));
    }

    #[test]
    fn owner_id_rules() {
        assert_eq!("gateway".parse::<OwnerId>().unwrap().as_str(), "gateway");
        assert_eq!("".parse::<OwnerId>(), Err(IdError::EmptyOwner));
        assert_eq!("a b".parse::<OwnerId>(), Err(IdError::InvalidOwner));
    }

    #[test]
    fn address_display() {
        let cid: ContainerId = CID.parse().unwrap();
        let oid = ObjectId::from_bytes([0u8; 32]);
        let addr = Address::new(cid, oid);
        assert_eq!(addr.to_string(), format!("{}/{}", CID, "0".repeat(64)));
    }
}
