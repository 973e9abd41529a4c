//! Lobby and connection management in front of the draft engine.
//!
//! The [`Gateway`] owns all mutable lobby state: bound clients, open
//! rooms, and running sessions. Each socket gets a [`Connection`] that
//! correlates server-initiated requests with client acks by seq, and
//! each running draft talks to its participants through a
//! [`GatewayEmitter`], which hides reconnection behind the session's
//! `Emitter` seam.

mod connection;
mod emitter;
mod gateway;
#[cfg(test)]
mod testing;

pub use connection::*;
pub use emitter::*;
pub use gateway::*;
