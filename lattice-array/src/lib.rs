//! Multi-dimensional array model and the partitioned read path.
//!
//! The entry point is [`read::Reader`]: given an [`schema::ArraySchema`], a
//! stack of immutable [`fragment::FragmentMetadata`] snapshots, a
//! [`subarray::Subarray`] and caller result buffers, it produces the cells
//! of the requested region in the requested [`dtype::Layout`], partitioning
//! the subarray so every batch of results fits the supplied buffers.

pub mod config;
pub mod coord;
pub mod domain;
pub mod dtype;
pub mod filter;
pub mod fragment;
pub mod read;
pub mod schema;
pub mod storage;
pub mod subarray;
pub mod tile;

pub use read::Reader;
