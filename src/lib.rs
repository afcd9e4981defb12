pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod provisioning;

pub use error::{ProvisioningError, ProvisioningResult};
