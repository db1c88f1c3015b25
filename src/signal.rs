//! Ctrl+C handling for cooperative cancellation.
//!
//! A shared `AtomicBool` is set when the user interrupts. The fingerprint
//! pipeline checks it between files and the engine between items; nothing
//! checks it while a metadata container is being written, so an interrupt
//! never leaves a half-written file behind.
//!
//! ```rust,no_run
//! use trackdedup::signal::install_handler;
//! use trackdedup::fingerprint::PipelineConfig;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! let config = PipelineConfig::default().with_shutdown_flag(handler.get_flag());
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code after an interrupt (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown programmatically.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// The flag, for passing to workers.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error installing the Ctrl+C handler.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The OS refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler.
///
/// Calling this again returns the already-installed handler with its flag
/// cleared, so repeated `run_app` calls (as in tests) share one handler.
///
/// # Errors
///
/// Returns [`SignalError`] if the handler cannot be registered for a reason
/// other than one already being present.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    let result = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Finishing the current file, then stopping..."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    });

    match result {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Signal handler already registered, using an unregistered flag");
            Ok(handler)
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_clear() {
        assert!(!ShutdownHandler::new().is_shutdown_requested());
    }

    #[test]
    fn test_request_is_visible_through_flag() {
        let handler = ShutdownHandler::new();
        let flag = handler.get_flag();
        handler.request_shutdown();
        assert!(flag.load(Ordering::SeqCst));
        handler.reset();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clones_share_state() {
        let handler = ShutdownHandler::new();
        let clone = handler.clone();
        clone.request_shutdown();
        assert!(handler.is_shutdown_requested());
    }

    #[test]
    fn test_install_twice_returns_handler() {
        let first = install_handler().unwrap();
        first.request_shutdown();
        let second = install_handler().unwrap();
        assert!(!second.is_shutdown_requested());
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(EXIT_CODE_INTERRUPTED, 130);
    }
}
