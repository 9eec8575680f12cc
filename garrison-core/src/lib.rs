//! Per-server log ingestion and event dispatch core for a game-server
//! administration platform.
//!
//! For each configured server this crate continuously ingests the
//! server's textual log stream from a pluggable transport (local
//! filesystem, SFTP, or FTP), parses recognized events, deduplicates them,
//! and publishes structured events to downstream consumers: an event bus,
//! a per-server player tracker, and a metrics aggregator.
//!
//! Everything outside this pipeline — HTTP handlers, the web UI,
//! authentication, server-definition persistence, the remote-console
//! transport, the plugin runtime, and analytics storage — is out of scope
//! and reached only through the collaborator traits in [`collab`].
//!
//! # Layout
//!
//! - [`ids`] / [`config`] / [`line`] / [`event`] — the data model.
//! - [`source`] — the three Log Source transports (C1).
//! - [`parser`] — the Parser Registry (C2).
//! - [`store`] — the Event Store and its key-value cache backends (C3).
//! - [`metrics`] — the Metrics Collector (C4).
//! - [`supervisor`] — the Connection Supervisor (C5).
//! - [`manager`] — the Manager (C6).
//! - [`prober`] — the Health Prober (C7).
//! - [`collab`] — the external interfaces this crate consumes.
//! - [`error`] — the shared error type.

pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod line;
pub mod manager;
pub mod metrics;
pub mod parser;
pub mod prober;
pub mod source;
pub mod store;
pub mod supervisor;

pub use error::{GarrisonError, Result};
pub use ids::ServerId;
pub use manager::Manager;
