//! Explicit re-architecture of the source's signal-handler-mutates-locals
//! pattern (spec.md §9): a `Supervisor` owns the running child and a
//! single-shot cancellation channel. The SIGTERM handler only ever touches
//! a latch and a channel send — the worker's main loop is the only place
//! that acts on a cancellation, always at a safe point between commands or
//! right after a child `wait()`.

use std::io;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

static CANCEL_TX: OnceLock<Mutex<Option<Sender<()>>>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_sigterm(_signum: libc::c_int) {
    if let Some(slot) = CANCEL_TX.get() {
        if let Ok(mut guard) = slot.try_lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Owns the cancellation receiver for one worker process's lifetime.
/// Constructing it installs the SIGTERM handler (Unix) or is a no-op
/// elsewhere; the returned receiver fires exactly once, on the first
/// signal.
pub struct Supervisor {
    cancel_rx: Receiver<()>,
}

impl Supervisor {
    /// Install the termination handler if `assume_resumable`, otherwise
    /// return a supervisor whose receiver never fires — the worker behaves
    /// as if no termination signal can arrive.
    pub fn install(assume_resumable: bool) -> Self {
        let (tx, rx) = mpsc::channel();
        if assume_resumable {
            let slot = CANCEL_TX.get_or_init(|| Mutex::new(None));
            *slot.lock().unwrap() = Some(tx);
            #[cfg(unix)]
            unsafe {
                let handler: extern "C" fn(libc::c_int) = on_sigterm;
                libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
            }
        }
        Self { cancel_rx: rx }
    }

    pub fn cancelled(&self) -> bool {
        matches!(self.cancel_rx.try_recv(), Ok(()))
    }

    /// Wait for `child` to exit, polling the cancellation latch between
    /// short timeouts so a signal arriving mid-run is noticed promptly
    /// without busy-spinning. Once cancellation fires the child is still
    /// running to completion (the contract never kills it): we simply keep
    /// blocking on `wait()` and report that cancellation happened.
    pub fn wait_for(&self, child: &mut Child) -> io::Result<(ExitStatus, bool)> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((status, false));
            }
            match self.cancel_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(()) => {
                    let status = child.wait()?;
                    return Ok((status, true));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    let status = child.wait()?;
                    return Ok((status, false));
                }
            }
        }
    }
}
