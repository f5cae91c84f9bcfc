//! Utility functions to generate and parse identifiers.
//!
//! An identifier is a Base-62 encoded UUID. It has a prefix that tells us the type of object it
//! identifies.
//!
//! For example, here is an identifier for a lease:
//! ```
//! "ls_8iCDGZ8pK9fAGxySBWh79A"
//! ```
//!
//! And here is one for an audit event:
//! ```
//! "ae_QCar3LwOwBPIeKonywpCpB"
//! ```
//!
//! Type prefixes make it easier to figure out the type of something that appears in the logs.

use std::collections::HashMap;
use std::convert::TryInto;

use base_62::base62;
use enum_iterator::IntoEnumIterator;
use lazy_static::lazy_static;
use uuid::Uuid;

/// The type of object an identifier indentifies.
#[derive(Clone, Copy, Debug, IntoEnumIterator, PartialEq, Eq, Hash)]
pub enum IdType {
    AuditEvent,
    Lease,
}

/// An identifier with a type. Example:
/// ```
/// let id = Id::new(IdType::Lease);
/// assert!(id.as_str().starts_with("ls_"));
/// ```
#[derive(Clone, Debug)]
pub struct Id {
    pub id_type: IdType,
    id_str: String,
}

impl Id {
    /// Generate a new identifier with a type.
    pub fn new(id_type: IdType) -> Self {
        let encoded = encode_uuid(&Uuid::new_v4());
        let id_str = format!("{}_{}", id_type.as_str(), encoded);
        Self { id_type, id_str }
    }

    /// Parse the id, if we can.
    pub fn parse(id_str: &str) -> Option<Self> {
        let idx = id_str.find('_')?;
        let (prefix, suffix) = id_str.split_at(idx);
        let suffix = &suffix[1..]; // start after '_'

        // valid type prefix, valid Base-62 encoded uuid suffix
        let id_type = IdType::from_prefix(prefix)?;
        decode_uuid(suffix)?;

        Some(Self {
            id_type,
            id_str: String::from(id_str),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.id_str
    }

    pub fn into_string(self) -> String {
        self.id_str
    }
}

impl IdType {
    /// Get the type's prefix.
    pub fn as_str(&self) -> &'static str {
        match *self {
            IdType::AuditEvent => "ae",
            IdType::Lease => "ls",
        }
    }

    /// Parse the type prefix and get the type, if it exists.
    pub fn from_prefix(prefix: &str) -> Option<IdType> {
        ID_PREFIX_TO_TYPE.get(prefix).copied()
    }
}

lazy_static! {
    static ref ID_PREFIX_TO_TYPE: HashMap<&'static str, IdType> = IdType::into_enum_iter()
        .map(|id_type| (id_type.as_str(), id_type))
        .collect();
}

/// Encode the UUID in Base-62 encoding.
pub fn encode_uuid(uuid: &Uuid) -> String {
    base62::encode(uuid.as_bytes())
}

/// Decode a UUID from a Base-62 encoded string, if we can.
pub fn decode_uuid(encoded: &str) -> Option<Uuid> {
    let decoded = base62::decode(encoded).ok()?;
    let bytes: [u8; 16] = decoded.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_id_types_have_distinct_prefixes() {
        let count = IdType::into_enum_iter().count();
        assert_eq!(ID_PREFIX_TO_TYPE.len(), count);
        for id_type in IdType::into_enum_iter() {
            assert_eq!(IdType::from_prefix(id_type.as_str()), Some(id_type));
        }
    }

    #[test]
    fn test_generate_and_parse_ids() {
        let lease_id = Id::new(IdType::Lease);
        assert!(lease_id.as_str().starts_with("ls_"));
        let parsed = Id::parse(lease_id.as_str());
        assert!(parsed.is_some());
        assert_eq!(parsed.unwrap().id_type, IdType::Lease);

        let invalid_prefix = format!("foobar_{}", encode_uuid(&Uuid::new_v4()));
        assert!(Id::parse(&invalid_prefix).is_none());

        let invalid_suffix = format!("{}_not*base62", IdType::AuditEvent.as_str());
        assert!(Id::parse(&invalid_suffix).is_none());
    }
}
