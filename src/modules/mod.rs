//! Built-in producers.
//!
//! Producers turn declared state into minimal command lists by diffing
//! against live facts. Each one is a value object carrying its declared
//! arguments; the engine compiles it per host through the
//! [`Producer`](crate::op::Producer) trait.
//!
//! - [`apt`]: Debian-family package management
//! - [`yum`]: RedHat-family package management
//! - [`pkg`]: OS-family dispatch over the package producers
//! - [`server`]: OS-level state (shell, users, port waits)

pub mod apt;
pub mod pkg;
pub mod server;
pub mod yum;
