//! Cooperative interrupt handling.
//!
//! SIGINT and SIGTERM only raise a process-wide flag. Polling loops and
//! sequence runners check it between steps and unwind with
//! [`Error::Interrupted`], so container handles are dropped, and therefore
//! torn down, on the way out. Remote commands in flight are killed rather
//! than waited for.

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handlers.
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is
        // async-signal-safe.
        unsafe { signal::sigaction(sig, &action) }.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "failed to install {} handler: {}",
                sig.as_str(),
                e
            )))
        })?;
    }
    debug!("signal handlers installed");
    Ok(())
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// `Err(Interrupted)` once a signal has arrived.
pub fn check() -> Result<()> {
    if is_interrupted() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Raise the flag as if a signal had arrived.
pub fn trigger() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Clear the flag.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
