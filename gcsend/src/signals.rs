//! SIGINT/SIGTERM handling
//!
//! The handler only records the signal and sets the shared cancel token. The streaming loop sees
//! the token, flushes the device and returns; `main` then re-raises the signal with its default
//! disposition so the parent process observes the usual signal death.

use gcstream::CancelToken;
use lazy_static::lazy_static;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

lazy_static! {
    static ref INTERRUPT: CancelToken = CancelToken::new();
}

static CAUGHT: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_signal(signum: i32) {
    CAUGHT.store(signum, Ordering::SeqCst);
    INTERRUPT.cancel();
}

/// Token set by the installed handlers
pub fn cancel_token() -> CancelToken {
    INTERRUPT.clone()
}

pub fn install() -> nix::Result<()> {
    // The handler must not be the one to run the lazy initializer
    lazy_static::initialize(&INTERRUPT);

    // No SA_RESTART: a signal has to interrupt the readiness wait
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // Safety: the handler only does atomic stores
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(())
}

/// Re-raises a caught signal with the default disposition; returns if none was caught
pub fn reraise() {
    if let Ok(sig) = Signal::try_from(CAUGHT.load(Ordering::SeqCst)) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // Safety: restoring the default disposition
        unsafe {
            let _ = signal::sigaction(sig, &default);
        }
        let _ = signal::raise(sig);
    }
}
