// ERP Field Mapping Registry
// Enabled/disabled state of each vendor attribute with respect to synchronization
// Backed by a bitmask over the VendorField catalog

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Field Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    BasicInfo,
    Identification,
    Classification,
    DatesMetrics,
    Financial,
    ContactsDocuments,
    InsuranceCompliance,
    Additional,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 8] = [
        FieldGroup::BasicInfo,
        FieldGroup::Identification,
        FieldGroup::Classification,
        FieldGroup::DatesMetrics,
        FieldGroup::Financial,
        FieldGroup::ContactsDocuments,
        FieldGroup::InsuranceCompliance,
        FieldGroup::Additional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldGroup::BasicInfo => "basic_info",
            FieldGroup::Identification => "identification",
            FieldGroup::Classification => "classification",
            FieldGroup::DatesMetrics => "dates_metrics",
            FieldGroup::Financial => "financial",
            FieldGroup::ContactsDocuments => "contacts_documents",
            FieldGroup::InsuranceCompliance => "insurance_compliance",
            FieldGroup::Additional => "additional",
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = VendorField> + '_ {
        VendorField::ALL.iter().copied().filter(move |f| f.group() == *self)
    }
}

macro_rules! vendor_fields {
    ($( $variant:ident => ($wire:literal, $group:ident) ),+ $(,)?) => {
        /// Every vendor attribute that can take part in a sync.
        ///
        /// The discriminant is the bit position in the registry mask, so new
        /// fields are appended, never inserted.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum VendorField {
            $( $variant ),+
        }

        impl VendorField {
            pub const ALL: &'static [VendorField] = &[ $( VendorField::$variant ),+ ];

            /// Stable wire name used in ERP payloads and the HTTP surface
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( VendorField::$variant => $wire ),+
                }
            }

            pub fn group(&self) -> FieldGroup {
                match self {
                    $( VendorField::$variant => FieldGroup::$group ),+
                }
            }
        }

        impl FromStr for VendorField {
            type Err = UnknownField;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(VendorField::$variant), )+
                    other => Err(UnknownField(other.to_string())),
                }
            }
        }
    };
}

vendor_fields! {
    VendorName => ("vendorName", BasicInfo),
    Category => ("category", BasicInfo),
    Location => ("location", BasicInfo),
    Status => ("status", BasicInfo),
    Description => ("description", BasicInfo),
    TaxId => ("taxId", Identification),
    DunsNumber => ("dunsNumber", Identification),
    RegistrationNumber => ("registrationNumber", Identification),
    VatNumber => ("vatNumber", Identification),
    ComplianceScore => ("complianceScore", Classification),
    RiskRating => ("riskRating", Classification),
    DiversityClassification => ("diversityClassification", Classification),
    IndustryCode => ("industryCode", Classification),
    LastTransactionAt => ("lastTransactionAt", DatesMetrics),
    OnboardedAt => ("onboardedAt", DatesMetrics),
    ContractEndDate => ("contractEndDate", DatesMetrics),
    OnTimeDeliveryRate => ("onTimeDeliveryRate", DatesMetrics),
    PaymentTerms => ("paymentTerms", Financial),
    Currency => ("currency", Financial),
    CreditLimit => ("creditLimit", Financial),
    BankAccount => ("bankAccount", Financial),
    PrimaryContact => ("primaryContact", ContactsDocuments),
    ContactEmail => ("contactEmail", ContactsDocuments),
    ContactPhone => ("contactPhone", ContactsDocuments),
    Website => ("website", ContactsDocuments),
    InsuranceProvider => ("insuranceProvider", InsuranceCompliance),
    InsuranceExpiry => ("insuranceExpiry", InsuranceCompliance),
    CertificationStatus => ("certificationStatus", InsuranceCompliance),
    ComplianceNotes => ("complianceNotes", InsuranceCompliance),
    Notes => ("notes", Additional),
    Tags => ("tags", Additional),
    CustomAttributes => ("customAttributes", Additional),
}

impl VendorField {
    fn bit(&self) -> u64 {
        1u64 << (*self as u8)
    }
}

impl fmt::Display for VendorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VendorField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VendorField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown vendor field: {0}")]
pub struct UnknownField(pub String);

// ============================================================================
// Registry
// ============================================================================

/// Which vendor fields a sync run may send or accept.
///
/// Toggling only flips bits; nothing happens until the next run reads the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappingRegistry {
    mask: u64,
}

impl Default for FieldMappingRegistry {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl FieldMappingRegistry {
    pub fn all_enabled() -> Self {
        let mask = VendorField::ALL.iter().fold(0u64, |acc, f| acc | f.bit());
        Self { mask }
    }

    pub fn from_enabled<I: IntoIterator<Item = VendorField>>(fields: I) -> Self {
        let mask = fields.into_iter().fold(0u64, |acc, f| acc | f.bit());
        Self { mask }
    }

    pub fn is_enabled(&self, field: VendorField) -> bool {
        self.mask & field.bit() != 0
    }

    /// Flip one field and return its new state
    pub fn toggle(&mut self, field: VendorField) -> bool {
        self.mask ^= field.bit();
        self.is_enabled(field)
    }

    pub fn set(&mut self, field: VendorField, enabled: bool) {
        if enabled {
            self.mask |= field.bit();
        } else {
            self.mask &= !field.bit();
        }
    }

    pub fn set_group(&mut self, group: FieldGroup, enabled: bool) {
        for field in group.fields() {
            self.set(field, enabled);
        }
    }

    pub fn enable_all(&mut self) {
        *self = Self::all_enabled();
    }

    pub fn disable_all(&mut self) {
        self.mask = 0;
    }

    pub fn enabled_fields(&self) -> BTreeSet<VendorField> {
        VendorField::ALL
            .iter()
            .copied()
            .filter(|f| self.is_enabled(*f))
            .collect()
    }

    /// (field, enabled) for the whole catalog in declaration order
    pub fn entries(&self) -> Vec<(VendorField, bool)> {
        VendorField::ALL
            .iter()
            .map(|f| (*f, self.is_enabled(*f)))
            .collect()
    }
}
