//! The boundary error protocol.
//!
//! Guest errors crossing into the host are propagated exactly, never
//! re-wrapped. Host failures crossing into the guest become an opaque
//! wrapped error value plus a synthesized traceback. Corruption-class
//! failures go through the idempotent fatal path instead.

use crate::error::{self, BridgeError, BridgeResult, HostFailure, TracebackFrame};
use crate::runtime::Handle;
use crate::types::{GuestError, GuestRuntime, HostValue};

use super::bridge::{Bridge, BridgeInner, FatalState};

impl<G: GuestRuntime, V: HostValue> BridgeInner<G, V> {
    /// Run one boundary call against the guest.
    ///
    /// On failure, an error indicator the guest recorded during the call
    /// wins over the error value the call returned: the indicator is the
    /// authoritative error and is carried through unchanged.
    pub(crate) fn guest_call<T>(
        &self,
        f: impl FnOnce(&G) -> Result<T, GuestError>,
    ) -> BridgeResult<T> {
        self.ensure_usable()?;
        match f(&self.guest) {
            Ok(value) => Ok(value),
            Err(raised) => {
                let err = self.guest.take_pending_error().unwrap_or(raised);
                Err(BridgeError::Guest(err))
            }
        }
    }

    /// Record `err` as the guest's pending error indicator.
    pub(crate) fn raise_in_guest(&self, err: BridgeError) {
        match err {
            BridgeError::AlreadyPropagated => {
                // The indicator must already be set; a bare sentinel with no
                // recorded error would surface as a nonsense failure in the
                // guest.
                if !self.guest.error_pending() {
                    error::mark_internal_fault();
                    log::error!("error reported as already propagated, but no guest error indicator is set");
                }
            }
            BridgeError::Guest(guest_err) => {
                if !self.guest.error_pending() {
                    self.guest.set_pending_error(guest_err);
                }
            }
            other => {
                let failure = match other {
                    BridgeError::Host(failure) => failure,
                    other => HostFailure::new(other.to_string()),
                };
                let frames = failure
                    .stack
                    .as_deref()
                    .map(synthesize_traceback)
                    .unwrap_or_default();
                let wrapped = self
                    .table
                    .borrow_mut()
                    .new_value(V::wrap_failure(&failure));
                self.guest.set_host_error(wrapped, &failure.message, &frames);
            }
        }
    }
}

impl<G: GuestRuntime, V: HostValue> Bridge<G, V> {
    /// Completion half of a guest-initiated host call.
    ///
    /// `Ok` passes the result handle through. Errors are translated onto the
    /// guest's error indicator and `None` is returned so the trampoline can
    /// hand the guest its error-return value. Invalid-handle errors mean the
    /// table can no longer be trusted and escalate to the fatal path.
    pub fn complete_host_call(&self, result: BridgeResult<Handle>) -> Option<Handle> {
        match result {
            Ok(handle) => Some(handle),
            Err(BridgeError::Fatal) => None,
            Err(err @ BridgeError::InvalidHandle(_)) => {
                self.fatal_error(err);
                None
            }
            Err(err) => {
                self.inner.raise_in_guest(err);
                None
            }
        }
    }

    /// Register a hook to run exactly once, when the bridge first fails
    /// fatally. Replaces any previously registered hook.
    pub fn on_fatal(&self, hook: impl FnOnce(&BridgeError) + 'static) {
        *self.inner.on_fatal.borrow_mut() = Some(Box::new(hook));
    }

    /// Fail the bridge permanently.
    ///
    /// The first call disables the public surface, runs the fatal hook once,
    /// and returns `cause` for the caller to re-raise. Every later call
    /// (including reentrant failures from inside the hook) returns
    /// [`BridgeError::Fatal`] without running anything.
    pub fn fatal_error(&self, cause: BridgeError) -> BridgeError {
        match self.inner.fatal.get() {
            FatalState::Failed => return BridgeError::Fatal,
            FatalState::Handling => {
                log::error!("fatal error raised while already handling one: {cause}");
                return BridgeError::Fatal;
            }
            FatalState::Usable => {}
        }
        self.inner.fatal.set(FatalState::Handling);
        log::error!("the bridge suffered a fatal error and is permanently disabled: {cause}");
        let hook = self.inner.on_fatal.borrow_mut().take();
        if let Some(hook) = hook {
            hook(&cause);
        }
        self.inner.fatal.set(FatalState::Failed);
        cause
    }
}

/// Parse a host stack trace into guest-facing traceback frames.
///
/// Accepts the common `at function (file:line:col)` and `at file:line:col`
/// shapes, one frame per line; unparseable lines are skipped. Leading
/// bridge-internal frames are dropped, and the frame list is truncated at
/// the next internal frame, so the guest sees only the host code between
/// the two boundary crossings.
pub fn synthesize_traceback(stack: &str) -> Vec<TracebackFrame> {
    let mut frames: Vec<TracebackFrame> = stack.lines().filter_map(parse_frame).collect();
    let start = frames
        .iter()
        .position(|frame| !is_internal_frame(frame))
        .unwrap_or(frames.len());
    frames.drain(..start);
    if let Some(end) = frames.iter().position(is_internal_frame) {
        frames.truncate(end);
    }
    frames
}

fn is_internal_frame(frame: &TracebackFrame) -> bool {
    frame.file.contains("tether-core/src") || frame.function.starts_with("tether_core::")
}

fn parse_frame(line: &str) -> Option<TracebackFrame> {
    let rest = line.trim().strip_prefix("at ")?;
    let (function, location) = match rest.find(" (") {
        Some(open) => {
            let inner = rest[open + 2..].strip_suffix(')')?;
            (&rest[..open], inner)
        }
        None => ("<anonymous>", rest),
    };
    let (file, line_no) = split_location(location);
    if file.is_empty() {
        return None;
    }
    Some(TracebackFrame {
        function: function.to_string(),
        file,
        line: line_no,
    })
}

/// Split `file:line:col` or `file:line`, where `file` may itself contain
/// colons (drive letters, URLs).
fn split_location(location: &str) -> (String, u32) {
    let segments: Vec<&str> = location.split(':').collect();
    let mut end = segments.len();
    let mut numbers: Vec<u32> = Vec::new();
    while end > 1 && numbers.len() < 2 {
        match segments[end - 1].parse::<u32>() {
            Ok(n) => {
                numbers.push(n);
                end -= 1;
            }
            Err(_) => break,
        }
    }
    let file = segments[..end].join(":");
    // With two trailing numbers the rightmost is the column.
    let line = numbers.last().copied().unwrap_or(0);
    (file, line)
}
