mod builder;
mod join;
#[allow(clippy::module_inception)]
mod node;

#[cfg(test)]
mod builder_test;
#[cfg(test)]
mod join_test;

pub use builder::*;
pub use join::*;
pub use node::*;
