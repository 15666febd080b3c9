//! Real-time two-player memory-match engine.
//!
//! Two clients play one match against a shared, remotely stored room
//! document with no mediating server process: matchmaking, board state,
//! turn control and forfeit handling all ride on the store's snapshot
//! subscriptions, optimistic transactions and commit-on-disconnect
//! registrations. This crate is the engine only; rendering, input widgets
//! and the surrounding application screens live with the host.

pub mod catalog;
pub mod config;
pub mod directory;
mod error;
pub mod services;
pub mod state;
pub mod store;

pub use error::ServiceError;
