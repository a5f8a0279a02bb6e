// Vendor Identity Service
// Derives the composite vendor identifier from a corporate entity name and a vendor name
// Format: EEEEEEEE-VVVVVVVV (CRC-32 of each normalized name, uppercase hex)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Wire format of a composite vendor id
static COMPOSITE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-F]{8}-[0-9A-F]{8}$").expect("composite id pattern is valid")
});

// ============================================================================
// Composite Id
// ============================================================================

/// Two independent 32-bit CRC halves: the corporate entity and the vendor.
///
/// Each half lives in a 2^32 namespace, so collisions inside one entity become
/// likely somewhere around 65k vendors. Nothing here detects them; callers that
/// persist ids rely on the directory rejecting duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    entity_hash: u32,
    vendor_hash: u32,
}

impl CompositeId {
    pub fn from_parts(entity_hash: u32, vendor_hash: u32) -> Self {
        Self { entity_hash, vendor_hash }
    }

    pub fn entity_hash(&self) -> u32 {
        self.entity_hash
    }

    pub fn vendor_hash(&self) -> u32 {
        self.vendor_hash
    }

    /// Entity half as rendered in the id (8 uppercase hex digits)
    pub fn entity_prefix(&self) -> String {
        format!("{:08X}", self.entity_hash)
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}-{:08X}", self.entity_hash, self.vendor_hash)
    }
}

impl FromStr for CompositeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self> {
        if !COMPOSITE_ID_REGEX.is_match(s) {
            return Err(IdentityError::InvalidArgument(format!(
                "'{}' is not a composite vendor id",
                crate::utils::log_sanitizer::sanitize_for_log(s)
            )));
        }

        let (entity, vendor) = s.split_at(8);
        let entity_hash = u32::from_str_radix(entity, 16)
            .map_err(|e| IdentityError::InvalidArgument(e.to_string()))?;
        let vendor_hash = u32::from_str_radix(&vendor[1..], 16)
            .map_err(|e| IdentityError::InvalidArgument(e.to_string()))?;

        Ok(Self { entity_hash, vendor_hash })
    }
}

impl Serialize for CompositeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompositeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Trim and uppercase, the only normalization applied before hashing
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Generate the composite id for `vendor_name` under the corporate entity `entity_name`.
///
/// Pure: the same pair of names always yields the same id regardless of
/// surrounding whitespace or letter case.
pub fn generate(vendor_name: &str, entity_name: &str) -> Result<CompositeId> {
    let vendor = normalize_name(vendor_name);
    if vendor.is_empty() {
        return Err(IdentityError::InvalidArgument("vendor name is required".to_string()));
    }

    let entity = normalize_name(entity_name);
    if entity.is_empty() {
        return Err(IdentityError::InvalidArgument("entity name is required".to_string()));
    }

    Ok(CompositeId {
        entity_hash: crc32fast::hash(entity.as_bytes()),
        vendor_hash: crc32fast::hash(vendor.as_bytes()),
    })
}
