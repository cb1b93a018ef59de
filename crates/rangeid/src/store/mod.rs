//! Key-addressed JSON document store with an optimistic update primitive.
//!
//! The store owns no business semantics. Every mutation of a consumption
//! record goes through [`optimistic_update`], which reads a fresh copy of the
//! document, runs a pure mutator over it, and writes back only if the version
//! read is still current, retrying on conflict.
//!
//! ## Structure
//!
//! - [`interface`] - The [`DocumentStore`] trait and its page/metadata types.
//! - [`keys`] - [`DocumentKey`] namespacing for app and pool documents.
//! - [`memory`] - In-process [`MemoryStore`] backend.
//! - [`optimistic`] - [`UpdatePolicy`] and the compare-and-retry loop.

pub mod interface;
pub mod keys;
pub mod memory;
pub mod optimistic;

pub use interface::*;
pub use keys::*;
pub use memory::*;
pub use optimistic::*;
