//! Deterministic, pure logic for turning the stream into facts.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod decode;
pub mod extract;
pub mod framer;
pub mod heuristic;
pub mod phase;
pub mod types;
