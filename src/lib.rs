//! Real-time replication of positioned notes across the clients sharing a
//! room.
//!
//! The server half (`store`, `hub`, `routes`) owns the authoritative state
//! and fans committed changes out over WebSockets. The client half
//! (`replica`, `client`) keeps a local copy in step with it.

pub mod client;
pub mod config;
pub mod db;
pub mod event;
pub mod frame;
pub mod hub;
pub mod model;
pub mod replica;
pub mod routes;
pub mod state;
pub mod store;
