pub mod erp_integration;
pub mod health;
pub mod vendors;
