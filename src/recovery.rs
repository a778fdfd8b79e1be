//! Error policy applied by the event loop.
//!
//! Per-connection and per-request failures never stop the loop by
//! themselves. An optional hook sees each failure and picks an
//! [`ErrorAction`]: whether to log it the default way, and whether to
//! keep serving.

use std::fmt;
use std::ops::BitOr;

use crate::error::ProcwireError;
use crate::source::SourceId;

/// What the loop does after a failure. Combine flags with `|`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorAction(u8);

impl ErrorAction {
    /// Neither flag: stop quietly.
    pub const STOP: ErrorAction = ErrorAction(0);
    /// Log the failure.
    pub const REPORT: ErrorAction = ErrorAction(0b01);
    /// Keep the loop running.
    pub const CONTINUE: ErrorAction = ErrorAction(0b10);

    pub fn contains(self, other: ErrorAction) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn reports(self) -> bool {
        self.contains(Self::REPORT)
    }

    pub fn continues(self) -> bool {
        self.contains(Self::CONTINUE)
    }
}

impl Default for ErrorAction {
    /// Log and continue.
    fn default() -> Self {
        ErrorAction::REPORT | ErrorAction::CONTINUE
    }
}

impl BitOr for ErrorAction {
    type Output = ErrorAction;

    fn bitor(self, rhs: ErrorAction) -> ErrorAction {
        ErrorAction(self.0 | rhs.0)
    }
}

impl fmt::Debug for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ErrorAction(report={}, continue={})",
            self.reports(),
            self.continues()
        )
    }
}

/// Hook consulted for every contained failure.
pub trait ErrorHook: Send + 'static {
    fn on_error(&mut self, source: SourceId, error: &ProcwireError) -> ErrorAction;
}

impl<F> ErrorHook for F
where
    F: FnMut(SourceId, &ProcwireError) -> ErrorAction + Send + 'static,
{
    fn on_error(&mut self, source: SourceId, error: &ProcwireError) -> ErrorAction {
        self(source, error)
    }
}

/// Decides the loop's reaction to a failure.
pub(crate) struct ErrorPolicy {
    hook: Option<Box<dyn ErrorHook>>,
}

impl ErrorPolicy {
    pub fn new(hook: Option<Box<dyn ErrorHook>>) -> Self {
        Self { hook }
    }

    /// Apply the policy. Returns whether the loop should keep going.
    pub fn handle(&mut self, source: SourceId, error: &ProcwireError) -> bool {
        let action = match self.hook.as_mut() {
            Some(hook) => hook.on_error(source, error),
            None => ErrorAction::default(),
        };

        if action.reports() {
            report(source, error);
        }
        if !action.continues() {
            tracing::warn!("Stopping after error on {}: {}", source, error);
        }
        action.continues()
    }
}

fn report(source: SourceId, error: &ProcwireError) {
    match error {
        ProcwireError::ConnectionClosed => {
            tracing::debug!("Connection {} closed", source)
        }
        ProcwireError::UnknownMethod(_) => {
            tracing::warn!("Request on {} failed: {}", source, error)
        }
        e if e.is_transport() => {
            tracing::warn!("Closing {} after transport error: {}", source, e)
        }
        e => tracing::error!("Error on {}: {}", source, e),
    }
}
