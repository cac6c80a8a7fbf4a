//! Middleware module
//!
//! Contains HTTP middleware shared by the proxy and admin routers.

pub mod logging;

pub use logging::{log_request, redact_query, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
