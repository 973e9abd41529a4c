//! Card pools and the tag filter expression language.
//!
//! A pool is a flat list of tagged items, each dealing one or more card
//! codes as a single pick option. Dispatchers slice pools with boolean
//! tag expressions and deal weighted-random subsets per round.
//!
//! - [`TagFilter`] — boolean query over an item's tag set
//! - [`Pool`] — dealing with replacement, unique codes, or free bundles
//! - [`CardLookup`] — read-only seam toward the external card database

mod card;
mod filter;
mod pool;

pub use card::*;
pub use filter::*;
pub use pool::*;
