//! Error types for the admin API

pub mod types;

pub use types::ApiError;
