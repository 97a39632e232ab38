//! Side-effecting collaborators: processes, git, files and the agent backend.

pub mod artifacts;
pub mod cancel;
pub mod config;
pub mod executor;
pub mod git;
pub mod process;
pub mod prompt;
pub mod test_runner;
pub mod workspace;
