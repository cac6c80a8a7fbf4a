//! Gemini Key Proxy library
//!
//! A forwarding proxy that attaches one of several API keys to every request,
//! rotating round-robin over the enabled keys, and keeps per-key and global
//! request statistics for monitoring.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
