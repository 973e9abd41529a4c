//! Dispatch schema tree and per-round candidate dispatchers.
//!
//! A preset resolves to a tree of `fork` (parallel), `seql` (sequential),
//! and `atom` (one concrete round) nodes. Each atom owns a [`Dispatcher`]
//! that computes one candidate-pack assignment per participant: from
//! weighted pool compositions, a fixed list, or a pool whose composition
//! depends on cards already picked.
//!
//! - [`Schema`] — the tree, with associativity-flattening simplification
//! - [`Dispatcher`] — closed union of the three dispatcher kinds
//! - [`Dispatching`] — one round's per-participant candidate assignment
//! - [`PresetConfig`] — declarative preset description, validated at build

mod adaptive;
mod candidate;
mod composed;
mod config;
mod fixed;
mod preset;
mod schema;

pub use adaptive::*;
pub use candidate::*;
pub use composed::*;
pub use config::*;
pub use fixed::*;
pub use preset::*;
pub use schema::*;
