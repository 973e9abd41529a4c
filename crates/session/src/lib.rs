//! Drafting session state machine and wire message types.
//!
//! A [`DraftingSession`] walks a dispatch schema to completion: fork
//! children run concurrently, seql children strictly in order, and each
//! atom runs as either a pack-passing draft round or a sealed round with
//! pick-count validation and per-participant retry. All traffic to
//! clients goes through the [`Emitter`] seam; the gateway implements it
//! with reliable reconnect-aware delivery.

mod message;
mod session;

pub use message::*;
pub use session::*;
