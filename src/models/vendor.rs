use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use validator::Validate;

use crate::services::erp::field_mapping::VendorField;
use crate::services::identity_service::CompositeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorStatus {
    Active,
    Inactive,
}

impl VendorStatus {
    pub fn as_str(&self) -> &str {
        match self {
            VendorStatus::Active => "active",
            VendorStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(VendorStatus::Active),
            "inactive" => Some(VendorStatus::Inactive),
            _ => None,
        }
    }
}

/// Canonical key of a vendor record inside one company's directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VendorId {
    Composite(CompositeId),
    Erp(String),
}

impl VendorId {
    pub fn as_key(&self) -> String {
        self.to_string()
    }

    pub fn is_erp(&self) -> bool {
        matches!(self, VendorId::Erp(_))
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorId::Composite(id) => write!(f, "{}", id),
            VendorId::Erp(id) => f.write_str(id),
        }
    }
}

impl Serialize for VendorId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid value for {field}: {reason}")]
pub struct FieldValueError {
    pub field: VendorField,
    pub reason: String,
}

impl FieldValueError {
    fn new(field: VendorField, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VendorRecord {
    pub id: VendorId,
    /// Always retained, even when an ERP id is canonical
    pub composite_id: CompositeId,
    pub erp_id: Option<String>,
    pub company_id: String,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub compliance_score: u8,
    pub status: VendorStatus,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub attributes: BTreeMap<VendorField, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl VendorRecord {
    pub fn new(composite_id: CompositeId, company_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: VendorId::Composite(composite_id),
            composite_id,
            erp_id: None,
            company_id: company_id.to_string(),
            name: name.trim().to_string(),
            category: None,
            location: None,
            compliance_score: 0,
            status: VendorStatus::Active,
            last_transaction_at: None,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        }
    }

    /// Current value of a field as it would appear in an outbound payload
    pub fn field_value(&self, field: VendorField) -> Option<Value> {
        match field {
            VendorField::VendorName => Some(Value::String(self.name.clone())),
            VendorField::Category => self.category.clone().map(Value::String),
            VendorField::Location => self.location.clone().map(Value::String),
            VendorField::Status => Some(Value::String(self.status.as_str().to_string())),
            VendorField::ComplianceScore => Some(Value::from(self.compliance_score)),
            VendorField::LastTransactionAt => self
                .last_transaction_at
                .map(|t| Value::String(t.to_rfc3339())),
            other => self.attributes.get(&other).cloned(),
        }
    }

    /// Apply one inbound value. Returns whether the record changed.
    pub fn apply_field(&mut self, field: VendorField, value: &Value) -> Result<bool, FieldValueError> {
        let changed = match field {
            VendorField::VendorName => {
                let name = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| FieldValueError::new(field, "expected a non-empty string"))?;
                replace(&mut self.name, name.to_string())
            }
            VendorField::Category => replace(&mut self.category, optional_string(field, value)?),
            VendorField::Location => replace(&mut self.location, optional_string(field, value)?),
            VendorField::Status => {
                let status = value
                    .as_str()
                    .and_then(VendorStatus::parse)
                    .ok_or_else(|| FieldValueError::new(field, "expected 'active' or 'inactive'"))?;
                replace(&mut self.status, status)
            }
            VendorField::ComplianceScore => {
                let score = parse_score(value)
                    .ok_or_else(|| FieldValueError::new(field, "expected an integer between 0 and 100"))?;
                replace(&mut self.compliance_score, score)
            }
            VendorField::LastTransactionAt => {
                let at = match value {
                    Value::Null => None,
                    Value::String(s) => Some(
                        DateTime::parse_from_rfc3339(s)
                            .map_err(|e| FieldValueError::new(field, e.to_string()))?
                            .with_timezone(&Utc),
                    ),
                    _ => return Err(FieldValueError::new(field, "expected an RFC 3339 timestamp")),
                };
                replace(&mut self.last_transaction_at, at)
            }
            other => {
                if value.is_null() {
                    self.attributes.remove(&other).is_some()
                } else if self.attributes.get(&other) == Some(value) {
                    false
                } else {
                    self.attributes.insert(other, value.clone());
                    true
                }
            }
        };

        if changed {
            self.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn optional_string(field: VendorField, value: &Value) -> Result<Option<String>, FieldValueError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
        _ => Err(FieldValueError::new(field, "expected a string")),
    }
}

fn parse_score(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u8::try_from(raw).ok().filter(|score| *score <= 100)
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVendorRequest {
    #[validate(length(min = 1, max = 200, message = "Vendor name required"))]
    pub name: String,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 200))]
    pub location: Option<String>,
    #[validate(range(max = 100, message = "Compliance score must be between 0 and 100"))]
    pub compliance_score: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchVendorsQuery {
    pub q: Option<String>,
    pub status: Option<VendorStatus>,
    pub min_compliance_score: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct VendorListResponse {
    pub vendors: Vec<VendorRecord>,
    pub total: usize,
}
