//! Deterministic, pure logic shared by the search controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod feedback;
pub mod novelty;
pub mod patch;
pub mod ratio;
pub mod realism;
pub mod state;
pub mod tech;
pub mod types;
pub mod validator;
