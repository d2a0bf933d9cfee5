//! Streaming client for a non-interactive assistant CLI.
//!
//! Each conversational turn spawns one assistant process that emits
//! newline-delimited JSON. The crate frames that output, decodes it, and
//! reduces it into answer text, thinking text and tool activity that a
//! renderer consumes incrementally. The layers are kept apart:
//!
//! - **[`core`]**: Pure, deterministic logic (framing, decoding, extraction,
//!   turn phases). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, binary resolution,
//!   process supervision). Isolated behind traits to enable mocking in tests.
//!
//! [`turn`] coordinates both to run one turn at a time and settle it exactly once.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod turn;
