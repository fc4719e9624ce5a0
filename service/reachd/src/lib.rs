//! reachd - Reach accessibility connection broker library
//!
//! This library implements the session/connection broker at the heart of
//! the Reach accessibility middleware:
//!
//! - [`broker`]: the composition root and reconciliation control loop
//! - [`account`]: per-account sessions, ability bookkeeping, state flags
//! - [`connection`]: the ability connection state machine
//! - [`channel`]: capability-checked command dispatch with bounded waits
//! - [`element`]: window/tree operator registry, tree id pool, request
//!   correlation
//! - [`peers`]: death watching for remote peer handles
//! - [`platform`]: the injected external collaborator interfaces
//! - [`queue`]: named serialized task queues
//! - [`testing`]: in-process fakes for tests and the demo platform
//!
//! The daemon binary (`main.rs` / [`bootstrap`]) is a thin CLI wrapper over
//! [`broker::Broker`].

#![forbid(unsafe_code)]

pub mod account;
pub mod bootstrap;
pub mod broker;
pub mod channel;
pub mod commands;
pub mod connection;
pub mod dump;
pub mod element;
pub mod peers;
pub mod platform;
pub mod queue;
pub mod testing;

pub use broker::{Broker, PlatformDeps};
pub use channel::Channel;
pub use connection::{AbilityConnection, ConnectionState};
