//! Uplink Core Library
//!
//! This library provides core functionality for the Uplink router including:
//! - Configuration management
//! - Transport abstraction over HTTP
//! - Geolocation lookup

pub mod config;
pub mod geo;
pub mod transport;

// Re-export commonly used types
pub use config::loader::{load_config, load_config_from_path};
pub use config::model::{
    validate_backend_specs, Backend, BackendSpec, Config, ConfigError, ConfigPatch, RouterConfig,
    ScoringWeights,
};
pub use geo::{GeoLocator, HttpGeoLocator, UserLocation};
pub use transport::{HttpTransport, RequestOptions, Transport, TransportError, TransportResponse};
