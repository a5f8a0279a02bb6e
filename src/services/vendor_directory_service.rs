// Vendor Directory Service
// Per-company cache of vendor records keyed by canonical vendor id
// Records change only through explicit creation, identity repair, or an ERP sync run

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::models::vendor::{CreateVendorRequest, SearchVendorsQuery, VendorId, VendorRecord};
use crate::services::identity_service::{self, CompositeId, IdentityError};
use crate::utils::log_sanitizer::sanitize_for_log;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Unknown company: {0}")]
    UnknownCompany(String),

    #[error("Vendor not found: {0}")]
    VendorNotFound(String),

    #[error("Vendor already exists: {0}")]
    DuplicateVendor(String),

    #[error("Vendor key conflict: {0}")]
    KeyConflict(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

// ============================================================================
// Company Name Lookup
// ============================================================================

/// Resolves a company id to the display name used as the identity entity name
pub trait CompanyNameLookup: Send + Sync {
    fn display_name(&self, company_id: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct CompanyRegistry {
    names: DashMap<String, String>,
}

impl CompanyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let registry = Self::new();
        for (id, name) in pairs {
            registry.register(id, name);
        }
        registry
    }

    pub fn register(&self, company_id: impl Into<String>, display_name: impl Into<String>) {
        self.names.insert(company_id.into(), display_name.into());
    }
}

impl CompanyNameLookup for CompanyRegistry {
    fn display_name(&self, company_id: &str) -> Option<String> {
        self.names.get(company_id).map(|name| name.value().clone())
    }
}

// ============================================================================
// Company Vendors
// ============================================================================

/// One company's records plus secondary indexes (composite id, linked ERP id)
#[derive(Debug, Default)]
pub struct CompanyVendors {
    records: BTreeMap<String, VendorRecord>,
    by_composite: HashMap<CompositeId, String>,
    by_erp: HashMap<String, String>,
}

impl CompanyVendors {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Canonical key for any known key: canonical, composite, or linked ERP id
    pub fn resolve_key(&self, key: &str) -> Option<String> {
        if self.records.contains_key(key) {
            return Some(key.to_string());
        }
        if let Ok(composite) = key.parse::<CompositeId>() {
            if let Some(canonical) = self.by_composite.get(&composite) {
                return Some(canonical.clone());
            }
        }
        self.by_erp.get(key).cloned()
    }

    pub fn get(&self, key: &str) -> Option<&VendorRecord> {
        self.resolve_key(key).and_then(|k| self.records.get(&k))
    }

    pub fn get_mut(&mut self, canonical: &str) -> Option<&mut VendorRecord> {
        self.records.get_mut(canonical)
    }

    pub fn key_for_composite(&self, id: &CompositeId) -> Option<String> {
        self.by_composite.get(id).cloned()
    }

    pub fn key_for_erp_id(&self, erp_id: &str) -> Option<String> {
        self.by_erp.get(erp_id).cloned()
    }

    pub fn records(&self) -> impl Iterator<Item = &VendorRecord> {
        self.records.values()
    }

    pub fn insert(&mut self, record: VendorRecord) -> Result<String> {
        if self.by_composite.contains_key(&record.composite_id) {
            return Err(DirectoryError::DuplicateVendor(record.composite_id.to_string()));
        }
        let key = record.id.as_key();
        if self.records.contains_key(&key) {
            return Err(DirectoryError::KeyConflict(key));
        }
        if let Some(erp_id) = &record.erp_id {
            if self.by_erp.contains_key(erp_id) {
                return Err(DirectoryError::KeyConflict(erp_id.clone()));
            }
            self.by_erp.insert(erp_id.clone(), key.clone());
        }

        self.by_composite.insert(record.composite_id, key.clone());
        self.records.insert(key.clone(), record);
        Ok(key)
    }

    /// Attach an ERP id as a secondary key. Returns whether anything changed.
    pub fn link_erp_id(&mut self, canonical: &str, erp_id: &str) -> Result<bool> {
        if let Some(owner) = self.by_erp.get(erp_id) {
            if owner != canonical {
                return Err(DirectoryError::KeyConflict(format!(
                    "ERP id {} already belongs to {}",
                    sanitize_for_log(erp_id),
                    owner
                )));
            }
        }

        let record = self
            .records
            .get_mut(canonical)
            .ok_or_else(|| DirectoryError::VendorNotFound(canonical.to_string()))?;

        if record.erp_id.as_deref() == Some(erp_id) {
            return Ok(false);
        }
        if let Some(previous) = record.erp_id.replace(erp_id.to_string()) {
            self.by_erp.remove(&previous);
        }
        self.by_erp.insert(erp_id.to_string(), canonical.to_string());
        Ok(true)
    }

    /// Move a record to a new canonical id, keeping secondary indexes in step.
    /// Returns the new canonical key.
    pub fn rekey(&mut self, canonical: &str, new_id: VendorId) -> Result<String> {
        let new_key = new_id.as_key();
        if new_key == canonical {
            return Ok(new_key);
        }
        if self.records.contains_key(&new_key) {
            return Err(DirectoryError::KeyConflict(new_key));
        }

        let mut record = self
            .records
            .remove(canonical)
            .ok_or_else(|| DirectoryError::VendorNotFound(canonical.to_string()))?;
        record.id = new_id;

        self.by_composite.insert(record.composite_id, new_key.clone());
        if let Some(erp_id) = &record.erp_id {
            self.by_erp.insert(erp_id.clone(), new_key.clone());
        }
        self.records.insert(new_key.clone(), record);
        Ok(new_key)
    }

    /// Replace the composite id of a record (identity repair only)
    fn reassign_composite(&mut self, canonical: &str, composite: CompositeId) -> Result<String> {
        if let Some(owner) = self.by_composite.get(&composite) {
            if owner != canonical {
                return Err(DirectoryError::DuplicateVendor(composite.to_string()));
            }
        }

        let record = self
            .records
            .get_mut(canonical)
            .ok_or_else(|| DirectoryError::VendorNotFound(canonical.to_string()))?;
        let previous = std::mem::replace(&mut record.composite_id, composite);
        let composite_is_canonical = matches!(record.id, VendorId::Composite(_));
        self.by_composite.remove(&previous);
        self.by_composite.insert(composite, canonical.to_string());

        if composite_is_canonical {
            self.rekey(canonical, VendorId::Composite(composite))
        } else {
            Ok(canonical.to_string())
        }
    }
}

// ============================================================================
// Vendor Directory
// ============================================================================

pub struct VendorDirectory {
    companies: DashMap<String, CompanyVendors>,
    lookup: Arc<dyn CompanyNameLookup>,
}

impl VendorDirectory {
    pub fn new(lookup: Arc<dyn CompanyNameLookup>) -> Self {
        Self {
            companies: DashMap::new(),
            lookup,
        }
    }

    /// Entity name used for identity generation
    pub fn entity_name(&self, company_id: &str) -> Result<String> {
        self.lookup
            .display_name(company_id)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| DirectoryError::UnknownCompany(company_id.to_string()))
    }

    /// Create a vendor under the company's display name
    pub fn create(&self, vendor_name: &str, company_id: &str) -> Result<VendorRecord> {
        let entity_name = self.entity_name(company_id)?;
        let composite_id = identity_service::generate(vendor_name, &entity_name)?;
        let record = VendorRecord::new(composite_id, company_id, vendor_name);

        self.insert(company_id, record)
    }

    pub fn create_vendor(&self, company_id: &str, request: &CreateVendorRequest) -> Result<VendorRecord> {
        let entity_name = self.entity_name(company_id)?;
        let composite_id = identity_service::generate(&request.name, &entity_name)?;

        let mut record = VendorRecord::new(composite_id, company_id, &request.name);
        record.category = request.category.clone().filter(|c| !c.trim().is_empty());
        record.location = request.location.clone().filter(|l| !l.trim().is_empty());
        record.compliance_score = request.compliance_score.unwrap_or(0).min(100);

        self.insert(company_id, record)
    }

    fn insert(&self, company_id: &str, record: VendorRecord) -> Result<VendorRecord> {
        let mut vendors = self.companies.entry(company_id.to_string()).or_default();
        vendors.insert(record.clone())?;

        tracing::info!(
            company_id = %sanitize_for_log(company_id),
            vendor_id = %record.id,
            "Vendor created: {}",
            sanitize_for_log(&record.name)
        );
        Ok(record)
    }

    /// Lookup by canonical id, composite id, or linked ERP id
    pub fn find_by_id(&self, company_id: &str, id: &str) -> Option<VendorRecord> {
        self.companies
            .get(company_id)
            .and_then(|vendors| vendors.get(id).cloned())
    }

    /// Case-insensitive substring match on name, category, and location
    pub fn search_term(&self, company_id: &str, term: &str) -> Vec<VendorRecord> {
        self.search(
            company_id,
            &SearchVendorsQuery {
                q: Some(term.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn search(&self, company_id: &str, query: &SearchVendorsQuery) -> Vec<VendorRecord> {
        let Some(vendors) = self.companies.get(company_id) else {
            return Vec::new();
        };

        let term = query
            .q
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let mut matches: Vec<VendorRecord> = vendors
            .records()
            .filter(|v| match &term {
                Some(term) => {
                    v.name.to_lowercase().contains(term)
                        || v.category.as_deref().is_some_and(|c| c.to_lowercase().contains(term))
                        || v.location.as_deref().is_some_and(|l| l.to_lowercase().contains(term))
                }
                None => true,
            })
            .filter(|v| query.status.map_or(true, |s| v.status == s))
            .filter(|v| query.min_compliance_score.map_or(true, |min| v.compliance_score >= min))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        matches
    }

    pub fn list(&self, company_id: &str) -> Vec<VendorRecord> {
        self.search(company_id, &SearchVendorsQuery::default())
    }

    /// Recompute a record's composite id from its current name and the company's
    /// entity name. The only path that changes an assigned composite id.
    pub fn repair_id(&self, company_id: &str, id: &str) -> Result<VendorRecord> {
        let entity_name = self.entity_name(company_id)?;
        let mut vendors = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| DirectoryError::VendorNotFound(id.to_string()))?;

        let canonical = vendors
            .resolve_key(id)
            .ok_or_else(|| DirectoryError::VendorNotFound(id.to_string()))?;
        let (name, current) = {
            let record = vendors
                .get(&canonical)
                .ok_or_else(|| DirectoryError::VendorNotFound(id.to_string()))?;
            (record.name.clone(), record.composite_id)
        };

        let repaired = identity_service::generate(&name, &entity_name)?;
        if repaired == current {
            return vendors
                .get(&canonical)
                .cloned()
                .ok_or_else(|| DirectoryError::VendorNotFound(id.to_string()));
        }

        let key = vendors.reassign_composite(&canonical, repaired)?;
        tracing::warn!(
            company_id = %sanitize_for_log(company_id),
            "Vendor composite id repaired: {} -> {}",
            current,
            repaired
        );

        vendors
            .get(&key)
            .cloned()
            .ok_or_else(|| DirectoryError::VendorNotFound(key))
    }

    /// Run `f` against one company's records under its lock. `f` must not block.
    pub fn with_company_mut<R>(&self, company_id: &str, f: impl FnOnce(&mut CompanyVendors) -> R) -> R {
        let mut vendors = self.companies.entry(company_id.to_string()).or_default();
        f(&mut vendors)
    }

    pub fn count(&self, company_id: &str) -> usize {
        self.companies.get(company_id).map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::vendor::VendorStatus;

    fn directory() -> VendorDirectory {
        let registry = CompanyRegistry::from_pairs([
            ("acme", "Acme Corporation"),
            ("globex", "Globex Industries"),
        ]);
        VendorDirectory::new(Arc::new(registry))
    }

    fn request(name: &str, category: &str, location: &str) -> CreateVendorRequest {
        CreateVendorRequest {
            name: name.to_string(),
            category: Some(category.to_string()),
            location: Some(location.to_string()),
            compliance_score: Some(90),
        }
    }

    #[test]
    fn test_create_uses_company_display_name() {
        let directory = directory();
        let vendor = directory.create("Eco Gas", "acme").unwrap();

        let expected = identity_service::generate("Eco Gas", "Acme Corporation").unwrap();
        assert_eq!(vendor.composite_id, expected);
        assert_eq!(vendor.id, VendorId::Composite(expected));
        assert_eq!(vendor.company_id, "acme");
    }

    #[test]
    fn test_companies_are_isolated() {
        let directory = directory();
        let a = directory.create("Eco Gas", "acme").unwrap();
        let b = directory.create("Eco Gas", "globex").unwrap();

        assert_ne!(a.composite_id, b.composite_id);
        assert!(directory.find_by_id("acme", &b.id.as_key()).is_none());
        assert_eq!(directory.count("acme"), 1);
        assert_eq!(directory.count("globex"), 1);
    }

    #[test]
    fn test_duplicate_and_unknown_company() {
        let directory = directory();
        directory.create("Eco Gas", "acme").unwrap();

        assert!(matches!(
            directory.create(" eco gas ", "acme"),
            Err(DirectoryError::DuplicateVendor(_))
        ));
        assert!(matches!(
            directory.create("Eco Gas", "initech"),
            Err(DirectoryError::UnknownCompany(_))
        ));
        assert!(matches!(
            directory.create("", "acme"),
            Err(DirectoryError::Identity(IdentityError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn test_search_matches_name_category_location() {
        let directory = directory();
        directory.create_vendor("acme", &request("Eco Gas", "Energy", "Houston")).unwrap();
        directory.create_vendor("acme", &request("Blue Freight", "Logistics", "Denver")).unwrap();
        directory.create_vendor("acme", &request("apex energy", "Utilities", "Austin")).unwrap();

        let by_category: Vec<String> = directory
            .search_term("acme", "ENERGY")
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(by_category, vec!["apex energy", "Eco Gas"]);

        assert_eq!(directory.search_term("acme", "denv").len(), 1);
        assert_eq!(directory.search_term("acme", "").len(), 3);
        assert!(directory.search_term("globex", "gas").is_empty());
    }

    #[test]
    fn test_search_filters() {
        let directory = directory();
        let vendor = directory.create("Eco Gas", "acme").unwrap();
        directory.create_vendor("acme", &request("Blue Freight", "Logistics", "Denver")).unwrap();

        directory.with_company_mut("acme", |vendors| {
            let record = vendors.get_mut(&vendor.id.as_key()).unwrap();
            record.status = VendorStatus::Inactive;
        });

        let inactive = directory.search(
            "acme",
            &SearchVendorsQuery { status: Some(VendorStatus::Inactive), ..Default::default() },
        );
        assert_eq!(inactive.len(), 1);

        let compliant = directory.search(
            "acme",
            &SearchVendorsQuery { min_compliance_score: Some(50), ..Default::default() },
        );
        assert_eq!(compliant.len(), 1);
        assert_eq!(compliant[0].name, "Blue Freight");
    }

    #[test]
    fn test_rekey_keeps_secondary_lookups() {
        let directory = directory();
        let vendor = directory.create("Eco Gas", "acme").unwrap();
        let composite = vendor.composite_id.to_string();

        directory.with_company_mut("acme", |vendors| {
            vendors.link_erp_id(&composite, "XYZ123").unwrap();
            vendors.rekey(&composite, VendorId::Erp("XYZ123".to_string())).unwrap();
        });

        let by_erp = directory.find_by_id("acme", "XYZ123").unwrap();
        assert_eq!(by_erp.id, VendorId::Erp("XYZ123".to_string()));
        let by_composite = directory.find_by_id("acme", &composite).unwrap();
        assert_eq!(by_composite.id, by_erp.id);
    }

    #[test]
    fn test_erp_id_cannot_be_linked_twice() {
        let directory = directory();
        let a = directory.create("Eco Gas", "acme").unwrap();
        let b = directory.create("Blue Freight", "acme").unwrap();

        directory.with_company_mut("acme", |vendors| {
            vendors.link_erp_id(&a.id.as_key(), "XYZ123").unwrap();
            assert!(matches!(
                vendors.link_erp_id(&b.id.as_key(), "XYZ123"),
                Err(DirectoryError::KeyConflict(_))
            ));
        });
    }

    #[test]
    fn test_repair_id_after_company_rename() {
        let registry = Arc::new(CompanyRegistry::from_pairs([("acme", "Acme")]));
        let directory = VendorDirectory::new(registry.clone());
        let vendor = directory.create("Eco Gas", "acme").unwrap();

        // Unchanged entity name: repair is a no-op
        let same = directory.repair_id("acme", &vendor.id.as_key()).unwrap();
        assert_eq!(same.composite_id, vendor.composite_id);

        registry.register("acme", "Acme Holdings");
        let repaired = directory.repair_id("acme", &vendor.id.as_key()).unwrap();
        let expected = identity_service::generate("Eco Gas", "Acme Holdings").unwrap();

        assert_eq!(repaired.composite_id, expected);
        assert_eq!(repaired.id, VendorId::Composite(expected));
        assert!(directory.find_by_id("acme", &vendor.id.as_key()).is_none());
        assert!(directory.find_by_id("acme", &expected.to_string()).is_some());
    }
}
