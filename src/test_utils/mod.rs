//! Shared helpers for the crate's unit tests
mod common;
mod entry_builder;

pub use common::*;
pub use entry_builder::*;
