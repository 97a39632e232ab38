//! Specification search for recorded commits.
//!
//! Given a repository and a target commit, the search looks for a
//! natural-language specification that, handed to a coding agent starting
//! from the parent commit, reproduces a change close to the real one while
//! still reading like a request a person would write. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (validation, scoring, feedback,
//!   search state transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, processes, files, the agent
//!   backend, tests). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`pool`], [`search`]) coordinate core logic with
//! I/O to implement the `run` command.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pool;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
