//! Configuration loading for the garrison log-ingestion core.
//!
//! This crate centralizes the ambient process configuration that the core
//! needs but that is otherwise left to the surrounding admin platform: event
//! store dedupe sizing, reconnect backoff overrides, the poll-frequency
//! clamp, and where to find the shared key-value cache. Per-server
//! [`crate::LogSourceConfig`]-style transport config is *not* loaded here —
//! it always arrives from the Server Catalog collaborator (see
//! `garrison_core::collab::ServerCatalog`).
//!
//! Loading is layered, cheapest-wins-last: built-in defaults, then an
//! optional TOML file, then environment variables.

pub mod env;
pub mod error;
pub mod loader;
pub mod model;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use model::GarrisonConfig;
