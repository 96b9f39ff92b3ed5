//! Replicated key-value store.
//!
//! A [`KvStore`] state machine is driven by a [`ConsensusEngine`] that
//! delivers committed [`Entry`]s in order; the [`Gateway`] turns client
//! requests into encoded [`Operation`]s submitted to that engine, and the
//! [`NodeBuilder`] wires the pieces together.

mod command;
mod config;
pub mod constants;
mod engine;
mod errors;
mod gateway;
pub mod metrics;
mod node;
mod storage;
pub mod utils;

pub use command::*;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use gateway::*;
pub use node::*;
pub use storage::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
