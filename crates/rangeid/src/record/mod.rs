//! Consumption records and the pure types they are built from.
//!
//! ## Structure
//!
//! - [`object_type`] - The enumerated object-type domain.
//! - [`range`] - Declared ranges and the candidate-space resolver.
//! - [`consumption`] - The per-app (or per-pool) JSON document.

pub mod consumption;
pub mod object_type;
pub mod range;

pub use consumption::*;
pub use object_type::*;
pub use range::*;
