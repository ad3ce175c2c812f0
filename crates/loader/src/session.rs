//! Orchestrates a launch: pty, fork, load, stack, jump.
//!
//! The child walks a straight line — stdio wired, image validated, segments
//! mapped, interpreter mapped if requested, stack built, jump — and any
//! stumble on the way is fatal to the child alone. The parent's only failure
//! modes are pty allocation and the fork itself, both reported as [`None`];
//! everything later it learns from the child's exit status and a dead master
//! descriptor.

use std::convert::Infallible;
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::path::Path;

use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, getegid, geteuid, getgid, getuid, ForkResult, Pid};
use snafu::prelude::*;

use crate::arch;
use crate::error::*;
use crate::interp;
use crate::mapper::{self, LoadedImage};
use crate::pty;
use crate::stack::{self, AuxEntry};

pub use nix::sys::wait::WaitStatus;

/// Size of the stack region handed to the target.
pub const STACK_SIZE: usize = 8 * 1024 * 1024;

/// A running launch: the child's pid and the master side of its terminal.
#[derive(Debug)]
pub struct Session {
    pub pid: Pid,
    pub master: OwnedFd,
}

impl Session {
    /// Blocks until the child changes state and returns what happened.
    ///
    /// # Errors
    /// Returns the host's error if the child cannot be waited on, e.g.
    /// because it was already reaped elsewhere.
    pub fn wait(&self) -> nix::Result<WaitStatus> {
        waitpid(self.pid, None)
    }
}

/// Starts the image at `path` inside a fresh pseudo-terminal, with exactly
/// the given argument and environment strings.
///
/// On success the caller owns the child's pid and the pty master; the slave
/// never leaves the child, the master never enters it. Returns [`None`] if
/// the pty or the fork is refused. Failures inside the child — unreadable or
/// malformed image, missing interpreter, mapping trouble — terminate the
/// child with a logged diagnostic and a non-zero exit status.
pub fn start_session(path: &Path, argv: &[String], envp: &[String]) -> Option<Session> {
    let pair = match pty::open_pty() {
        Ok(pair) => pair,
        Err(error) => {
            log::error!("{error}");
            return None;
        }
    };

    // SAFETY: the child never returns into the caller; it either becomes the
    // target image or exits. The parent continues untouched.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            drop(pair.slave);
            log::debug!("session for {} running as pid {child}", path.display());
            Some(Session { pid: child, master: pair.master })
        }
        Ok(ForkResult::Child) => {
            drop(pair.master);
            match launch(path, argv, envp, pair.slave) {
                Err(error) => {
                    log::error!("unable to launch {}: {error}", path.display());
                    std::process::exit(1);
                }
                Ok(never) => match never {},
            }
        }
        Err(source) => {
            log::error!("{}", Error::ForkFailed { source });
            None
        }
    }
}

/// Child-side tail of the launch. Never returns: on success control belongs
/// to the image, on failure the caller exits the child.
fn launch(path: &Path, argv: &[String], envp: &[String], slave: OwnedFd) -> Result<Infallible> {
    pty::attach_slave(slave)?;

    let printable = path.display().to_string();
    let file = File::open(path).context(ImageOpenSnafu { path: printable.as_str() })?;
    let (image, table) = mapper::load_object(&file, &printable)?;
    let resolved = interp::resolve(&file, &table, &image)?;
    drop(file);

    let region = allocate_stack()?;
    let base = region.as_ptr() as usize;
    let auxv = aux_template(&image, resolved.interpreter_base);
    let stack_pointer = stack::fabricate(region, base, argv, envp, &auxv)?;

    log::debug!("entering at {:#x}, sp {stack_pointer:#x}", resolved.jump_target);
    // SAFETY: the image and stack were fully materialised above; nothing of
    // the launcher is needed past this point.
    unsafe { arch::enter_image(resolved.jump_target, stack_pointer) }
}

/// Maps the anonymous region that becomes the target's stack. The region is
/// leaked on purpose — it outlives the launcher by definition.
fn allocate_stack() -> Result<&'static mut [u8]> {
    // STACK_SIZE is trivially non-zero
    let length = NonZeroUsize::new(STACK_SIZE).unwrap();
    // SAFETY: fresh anonymous mapping, no fixed address.
    let pages = unsafe {
        mmap_anonymous(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_STACK,
        )
    }
    .context(StackUnavailableSnafu)?;
    // SAFETY: the mapping above is writable, STACK_SIZE long, and never unmapped.
    Ok(unsafe { core::slice::from_raw_parts_mut(pages.as_ptr().cast(), STACK_SIZE) })
}

/// Builds the auxiliary vector template for a mapped image. `AT_RANDOM`
/// carries a placeholder until the stack fabricator patches it; `AT_BASE` is
/// only present when an interpreter was mapped.
fn aux_template(image: &LoadedImage, interpreter_base: Option<usize>) -> Vec<AuxEntry> {
    let mut auxv = vec![
        AuxEntry::new(libc::AT_PHDR, image.table_address as u64),
        AuxEntry::new(libc::AT_PHNUM, u64::from(image.table_count)),
        AuxEntry::new(libc::AT_PHENT, u64::from(image.table_entry_size)),
        AuxEntry::new(libc::AT_ENTRY, image.entry as u64),
        AuxEntry::new(libc::AT_UID, u64::from(getuid().as_raw())),
        AuxEntry::new(libc::AT_EUID, u64::from(geteuid().as_raw())),
        AuxEntry::new(libc::AT_GID, u64::from(getgid().as_raw())),
        AuxEntry::new(libc::AT_EGID, u64::from(getegid().as_raw())),
        AuxEntry::new(libc::AT_SECURE, 0),
        AuxEntry::new(libc::AT_PAGESZ, mapper::page_size() as u64),
        AuxEntry::new(libc::AT_FLAGS, 0),
        AuxEntry::new(libc::AT_RANDOM, 0),
    ];
    if let Some(interpreter_base) = interpreter_base {
        auxv.push(AuxEntry::new(libc::AT_BASE, interpreter_base as u64));
    }
    auxv
}
