//! I/O helpers for the assistant client.

pub mod config;
pub mod launch;
pub mod process;
pub mod resolver;
