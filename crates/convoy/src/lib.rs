pub mod app;
pub mod config;
pub mod health;
pub mod http;
pub mod management;
pub mod policy;
pub mod pool;
pub mod proxy;
pub mod telemetry;

pub use config::{BackendConfig, Config, PolicyKind, RateLimitConfig};
pub use pool::BackendPool;
pub use pool::backend::Backend;
