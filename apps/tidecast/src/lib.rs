//! tidecast — a multi-user terminal-application server.
//!
//! Every connected user participates in one shared world owned by a single
//! authoritative event loop. The loop is the only writer to a broadcast bus
//! (`ringcast`); each session runs its own UI loop that subscribes to the
//! bus, replays recent history on join, and forwards user input back through
//! a many-to-one channel. Durable events are persisted to an append-only log
//! and rehydrated for late joiners.

pub mod client;
pub mod config;
pub mod message;
pub mod program;
pub mod record;
pub mod session;
pub mod transport;
pub mod world;
