//! Pseudo-terminal plumbing around the launch.
//!
//! The parent ends up holding only the master descriptor; the child turns the
//! slave into its controlling terminal and its stdio before any loading
//! starts, so even early fatal diagnostics surface on the terminal.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::pty::openpty;
use nix::unistd::{dup2, setsid};
use snafu::prelude::*;

use crate::error::*;

/// Master and slave descriptors of a freshly allocated pseudo-terminal. The
/// slave's path is deliberately not exposed.
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocates a fresh pseudo-terminal pair.
///
/// # Errors
/// Returns [`Error::PtyUnavailable`] if the host denies the allocation.
pub fn open_pty() -> Result<PtyPair> {
    let pty = openpty(None, None).context(PtyUnavailableSnafu)?;
    Ok(PtyPair { master: pty.master, slave: pty.slave })
}

/// Child-side half of the wiring: start a new session, acquire `slave` as the
/// controlling terminal, and duplicate it onto stdin, stdout, and stderr.
///
/// # Errors
/// Returns [`Error::PtyUnavailable`] if the session or descriptor wiring
/// fails. A host that refuses the controlling-terminal ioctl is tolerated;
/// the target then simply runs without job control.
pub fn attach_slave(slave: OwnedFd) -> Result<()> {
    setsid().context(PtyUnavailableSnafu)?;
    // SAFETY: plain ioctl on an owned descriptor; failure is deliberately ignored.
    let _ = unsafe { libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY, 0) };

    for stdio in 0..=2 {
        dup2(slave.as_raw_fd(), stdio).context(PtyUnavailableSnafu)?;
    }
    // Descriptors 0..=2 hold their own references now; dropping `slave`
    // closes the extra one, unless it already was one of them.
    if slave.as_raw_fd() <= 2 {
        std::mem::forget(slave);
    }
    Ok(())
}
