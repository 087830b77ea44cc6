//! # Heron GC
//!
//! Typed arenas addressed by generation-checked handles.
//!
//! ## Design
//!
//! - **Handles, not pointers**: a [`Handle`] is an index plus the generation of
//!   the slot it was issued for, so a handle that outlives its cell is detected
//!   instead of aliasing whatever reuses the slot
//! - **Mark/sweep helpers**: the embedder marks reachable handles in a
//!   [`MarkSet`] and [`Arena::sweep`] frees the rest

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod arena;
pub mod heap;
pub mod mark_sweep;

pub use arena::{Arena, Handle};
pub use heap::{GcConfig, GcStats};
pub use mark_sweep::MarkSet;
