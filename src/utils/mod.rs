//! Utility modules
//!
//! Contains timeout handling and key-masking helpers.

pub mod string;
pub mod timeout;

pub use string::{first_chars, last_chars, mask_key};
pub use timeout::{with_timeout, TimeoutConfig, TimeoutError};
