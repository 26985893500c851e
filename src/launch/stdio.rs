use std::{
    io::{self, Write},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::warn;

/// Redirects the process' stdout and stderr to the null device until dropped.
///
/// Descriptors are process-global, so suppression is too: while any guard is
/// alive, every thread's output is discarded, including rank 0's when several
/// ranks share a process. Guards are counted; the first one saves the real
/// descriptors and the last one dropped restores them, in whatever order the
/// guards are released, including while unwinding.
pub struct SuppressGuard {
    _private: (),
}

/// Shared by every guard of the process.
struct Suppression {
    holders: usize,
    #[cfg(unix)]
    saved: Vec<(i32, std::os::fd::OwnedFd)>,
}

static SUPPRESSION: Mutex<Suppression> = Mutex::new(Suppression {
    holders: 0,
    #[cfg(unix)]
    saved: Vec::new(),
});

fn suppression() -> MutexGuard<'static, Suppression> {
    SUPPRESSION.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SuppressGuard {
    /// Starts discarding stdout and stderr, or joins the suppression already in place.
    ///
    /// # Errors
    /// Fails if the null device can't be opened or a descriptor can't be duplicated;
    /// in that case nothing stays redirected.
    pub fn acquire() -> io::Result<Self> {
        let mut state = suppression();

        if state.holders == 0 {
            redirect(&mut state)?;
        }
        state.holders += 1;

        Ok(Self { _private: () })
    }

    /// Amount of guards currently alive in the process.
    pub fn holders() -> usize {
        suppression().holders
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        let mut state = suppression();

        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            restore(&mut state);
        }
    }
}

#[cfg(unix)]
fn redirect(state: &mut Suppression) -> io::Result<()> {
    use std::{fs::OpenOptions, os::fd::AsRawFd};

    flush_std();

    let null = OpenOptions::new().write(true).open("/dev/null")?;

    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        let saved = dup(fd)?;
        // SAFETY: both descriptors are open for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            let err = io::Error::last_os_error();
            restore(state);
            return Err(err);
        }
        state.saved.push((fd, saved));
    }

    Ok(())
}

#[cfg(unix)]
fn restore(state: &mut Suppression) {
    use std::os::fd::AsRawFd;

    flush_std();

    for (fd, saved) in state.saved.drain(..).rev() {
        // SAFETY: `saved` is an owned, open duplicate of the descriptor it replaced.
        if unsafe { libc::dup2(saved.as_raw_fd(), fd) } < 0 {
            warn!(fd = fd; "failed to restore descriptor: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(unix)]
fn dup(fd: i32) -> io::Result<std::os::fd::OwnedFd> {
    use std::os::fd::FromRawFd;

    // SAFETY: `dup` has no memory-safety preconditions.
    let raw = unsafe { libc::dup(fd) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `raw` was just returned by `dup` and is owned by nobody else.
    Ok(unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) })
}

#[cfg(not(unix))]
fn redirect(_state: &mut Suppression) -> io::Result<()> {
    warn!("output suppression is only supported on unix, output stays visible");
    Ok(())
}

#[cfg(not(unix))]
fn restore(_state: &mut Suppression) {}

/// Pushes out anything buffered so it lands on the descriptor it was written for.
fn flush_std() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}
