//! Services module
//!
//! Key rotation, request statistics, the forwarding pipeline, the runtime
//! display settings and process resource sampling.

pub mod forwarding;
pub mod key_pool;
pub mod settings;
pub mod stats;
pub mod system;

pub use forwarding::{
    DirectedRequest, DirectorError, ForwardingPipeline, ProxyRequest, ReqwestTransport,
    TransportError, UpstreamRequest, UpstreamResponse, UpstreamTransport,
};
pub use key_pool::{ApiKey, KeyPool, KeySnapshot, KeyStatus, PoolError, PoolStats};
pub use settings::{DisplaySettings, KeyDisplayFormat, SettingsError, SettingsManager};
pub use stats::{ErrorEvent, GlobalSnapshot, GlobalStats, Outcome};
pub use system::{SystemInformation, SystemMonitor};
