//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod clock;
pub mod memory_store;
pub mod memory_surface;
pub mod ports;
