pub mod configuration_repo;

pub use configuration_repo::*;
