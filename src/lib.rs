//! A durable WebSocket client that supervises a single long-lived session:
//! automatic reconnection with exponential backoff, a bounded outbound
//! queue, application-level keepalive handling, and a background health
//! checker. See [`session::Session`] for the entry point.

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod queue;
pub mod session;
pub mod transport;
pub mod wire;
