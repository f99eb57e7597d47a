//! Nestable X protocol error traps.
//!
//! Speculative requests (probing a foreign window, creating a GLX pixmap that the driver may
//! reject, tearing down a drawable on a half-dead connection) are issued inside a trap. Any
//! protocol error that arrives while a trap is active is recorded in the innermost trap instead
//! of being reported, and handed back as a plain error code when the trap is removed.

use tracing::{debug, trace};

use super::XServer;

/// Identifies one pushed trap.
///
/// Must be handed back to [`ErrorTrapStack::pop`] in strict stack order.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a trap must be removed again"]
pub struct TrapToken {
    depth: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct TrapFrame {
    error_code: u8,
}

/// Stack of active error traps owned by a connection
#[derive(Debug, Default)]
pub struct ErrorTrapStack {
    frames: Vec<TrapFrame>,
}

impl ErrorTrapStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new innermost trap
    pub fn push(&mut self) -> TrapToken {
        let depth = self.frames.len();
        self.frames.push(TrapFrame::default());
        trace!(depth, "X error trap pushed");
        TrapToken { depth }
    }

    /// Record a protocol error in the innermost trap.
    ///
    /// Returns `false` if no trap is active, in which case the caller has to report the error.
    pub fn record(&mut self, error_code: u8) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.error_code = error_code;
                true
            }
            None => false,
        }
    }

    /// Remove the innermost trap and return the error it caught, `0` if none.
    ///
    /// # Panics
    ///
    /// Panics if `token` does not belong to the innermost trap. Traps must be removed in the
    /// reverse order they were pushed.
    pub fn pop(&mut self, token: TrapToken) -> u8 {
        assert_eq!(
            token.depth + 1,
            self.frames.len(),
            "X error traps must be removed innermost first"
        );
        let frame = self.frames.pop().unwrap_or_default();
        trace!(depth = token.depth, error_code = frame.error_code, "X error trap popped");
        frame.error_code
    }

    /// Whether any trap is currently active
    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Number of active traps
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Scoped error trap.
///
/// Removes its trap when dropped, so an early return can never leave a dangling trap behind.
/// Use [`ErrorTrap::finish`] to learn whether an error was caught.
#[derive(Debug)]
pub struct ErrorTrap<'a, S: XServer + ?Sized> {
    server: &'a S,
    token: Option<TrapToken>,
}

impl<'a, S: XServer + ?Sized> ErrorTrap<'a, S> {
    /// Push a trap on `server`
    pub fn new(server: &'a S) -> Self {
        let token = server.trap_errors();
        ErrorTrap {
            server,
            token: Some(token),
        }
    }

    /// Synchronize with the server, remove the trap and return the caught error code
    pub fn finish(mut self) -> u8 {
        match self.token.take() {
            Some(token) => self.server.untrap_errors(token),
            None => 0,
        }
    }
}

impl<'a, S: XServer + ?Sized> Drop for ErrorTrap<'a, S> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let code = self.server.untrap_errors(token);
            if code != 0 {
                debug!(code, "X error caught by an abandoned trap");
            }
        }
    }
}
