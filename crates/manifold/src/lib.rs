//! Core runtime for Manifold: the canonical object store, the transactional
//! index contract and its concrete index family, the orchestrating cache, and
//! the listener/notification layer.
//!
//! All records are immutable once stored; a "mutation" replaces the value held
//! under the same identity. Every public mutation is all-or-nothing across the
//! store and every registered index, and listeners only ever observe fully
//! consistent state.
#![warn(unreachable_pub)]

pub mod cache;
pub mod error;
pub mod index;
pub mod obs;
pub mod store;
pub mod types;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, stores, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        cache::{Cache, Hint, Listenable},
        types::{Change, Id, Keyed},
    };
}
