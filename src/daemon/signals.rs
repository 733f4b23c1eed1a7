//! Signal handling and the ordered shutdown sequence.
//!
//! SIGTERM and SIGINT set a shared flag through `signal-hook`; the daemon
//! polls it between relay checks rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::Result;

/// Shutdown flag shared between OS signal hooks and the daemon loop.
#[derive(Clone, Default)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM/SIGINT.
    ///
    /// Registration is best-effort; failures go to stderr.
    pub fn new() -> Self {
        let handler = Self::detached();
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&handler.shutdown_flag)) {
                eprintln!("[WS-SIGNAL] failed to register {name}: {e}");
            }
        }
        handler
    }

    /// A handler with no OS hooks; shutdown only via [`request_shutdown`](Self::request_shutdown).
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}

// ──────────────────── shutdown coordinator ────────────────────

/// Outcome of one named shutdown step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

/// What the shutdown sequence did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
    /// Steps never started because the deadline passed.
    pub abandoned: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.steps.iter().all(|s| s.ok)
    }
}

/// A named step run during shutdown.
pub type ShutdownStep<'a> = (&'static str, Box<dyn FnOnce(Duration) -> Result<()> + 'a>);

/// Runs shutdown steps in order under one overall deadline.
///
/// Each step receives the time left before the deadline so it can bound its
/// own waits.
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn execute(&self, steps: Vec<ShutdownStep<'_>>) -> ShutdownReport {
        let start = Instant::now();
        let mut report = ShutdownReport::default();

        for (name, step) in steps {
            let Some(remaining) = self.timeout.checked_sub(start.elapsed()) else {
                eprintln!("[WS-SHUTDOWN] deadline passed, skipping {name}");
                report.abandoned.push(name);
                continue;
            };
            match step(remaining) {
                Ok(()) => {
                    eprintln!("[WS-SHUTDOWN] {name}: ok");
                    report.steps.push(StepOutcome {
                        name,
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    eprintln!("[WS-SHUTDOWN] {name}: {e}");
                    report.steps.push(StepOutcome {
                        name,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::WsError;

    #[test]
    fn detached_handler_starts_clear() {
        let handler = SignalHandler::detached();
        assert!(!handler.should_shutdown());
    }

    #[test]
    fn clones_share_the_flag() {
        let handler = SignalHandler::detached();
        let other = handler.clone();
        handler.request_shutdown();
        assert!(other.should_shutdown());
    }

    #[test]
    fn coordinator_runs_steps_in_order() {
        let order = std::cell::RefCell::new(Vec::new());
        let steps: Vec<ShutdownStep<'_>> = vec![
            (
                "first",
                Box::new(|_: Duration| {
                    order.borrow_mut().push("first");
                    Ok(())
                }),
            ),
            (
                "second",
                Box::new(|_: Duration| {
                    order.borrow_mut().push("second");
                    Ok(())
                }),
            ),
        ];
        let report = ShutdownCoordinator::default().execute(steps);
        assert!(report.is_clean());
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn failures_are_reported_and_later_steps_still_run() {
        let steps: Vec<ShutdownStep<'_>> = vec![
            (
                "bad",
                Box::new(|_: Duration| {
                    Err(WsError::Runtime {
                        details: "nope".to_string(),
                    })
                }),
            ),
            ("good", Box::new(|_: Duration| Ok(()))),
        ];
        let report = ShutdownCoordinator::default().execute(steps);
        assert!(!report.is_clean());
        assert!(!report.steps[0].ok);
        assert!(report.steps[1].ok);
    }

    #[test]
    fn steps_past_the_deadline_are_abandoned() {
        let steps: Vec<ShutdownStep<'_>> = vec![
            (
                "slow",
                Box::new(|_: Duration| {
                    std::thread::sleep(Duration::from_millis(20));
                    Ok(())
                }),
            ),
            ("late", Box::new(|_: Duration| Ok(()))),
        ];
        let report = ShutdownCoordinator::new(Duration::from_millis(5)).execute(steps);
        assert_eq!(report.abandoned, vec!["late"]);
        assert!(!report.is_clean());
    }
}
