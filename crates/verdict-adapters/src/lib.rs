//! Runtime adapters for verdict (config, HTTP provider, logging).

pub mod config;
pub mod http;
pub mod telemetry;

pub use config::{Config, EnvOverlay};
pub use http::HttpProvider;
