mod kv_store;
mod sled_log;
mod snapshot_store;
mod state_machine;


pub use kv_store::*;
pub use sled_log::*;
pub use snapshot_store::*;
pub use state_machine::*;
