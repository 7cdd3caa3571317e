// Dache client - distributed in-memory cache client
// Core library module

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod routing;
pub mod serialization;
pub mod transport;

pub use client::CacheClient;
pub use config::ClientSettings;
pub use error::{CacheError, Result};
pub use events::CacheEvent;
pub use serialization::{BincodeSerializer, CacheSerializer, JsonSerializer};
pub use transport::{
    HostConnection, HostEndpoint, HostEvent, HostTransport, HostTransportFactory,
    TransportOptions, WritePolicy,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
