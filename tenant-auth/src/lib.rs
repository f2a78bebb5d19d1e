//! Tenant-scoped authentication core: signed access credentials, rotating
//! refresh credentials, a TTL-backed revocation store and batched
//! role/permission resolution.

pub mod config;
pub mod dtos;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{AuthConfig, SystemIds};
pub use services::{AuthError, AuthService, ErrorKind};
