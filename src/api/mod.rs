//! API endpoint handlers module
//!
//! The proxy catch-all handler and the admin/monitoring endpoints.

pub mod dashboard;
pub mod health;
pub mod keys;
pub mod proxy;
pub mod settings;
pub mod stats;
