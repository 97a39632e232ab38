//! Run-scoped cancellation.
//!
//! A [`CancelToken`] is shared by the controller and every child process it
//! spawns. Blocking calls check it at their boundaries; running child
//! processes are killed once it fires.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

/// Returned when work is aborted by the run-scoped cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run cancelled")
    }
}

impl std::error::Error for CancelledError {}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`CancelledError`] once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CancelledError.into());
        }
        Ok(())
    }

    /// Fire this token on Ctrl-C. Can only be installed once per process.
    pub fn install_ctrlc_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, cancelling run");
            token.cancel();
        })
        .context("install ctrl-c handler")
    }
}
