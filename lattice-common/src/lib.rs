//! Core definitions (errors, results, cancellation), relied upon by all lattice-* crates.

pub mod cancel;
pub mod error;
pub mod macros;
pub mod result;

pub use result::Result;
