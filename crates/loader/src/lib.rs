//! This crate is the core of [Charon](https://crates.io/crates/charon): a
//! userspace launcher that does what the kernel's program loader would,
//! without ever calling it for the image itself.
//!
//! [`start_session`](session::start_session) allocates a pseudo-terminal,
//! forks, and in the child: validates the image, materialises its loadable
//! segments (and those of its dynamic interpreter, if it requests one),
//! fabricates the initial stack — argument and environment pointers,
//! auxiliary vector, random bytes — and branches to the entry point. The
//! parent gets back the child's pid and the master side of the terminal.
//!
//! Everything past the branch belongs to the target; the launcher's own heap
//! and stack are never touched again. A failure anywhere in the child is
//! fatal to the child and nothing else.

#![deny(unused_crate_dependencies)]

// All public modules
pub mod arch;
pub mod error;
pub mod interp;
pub mod mapper;
pub mod pty;
pub mod session;
pub mod stack;

// Prelude, for convenience
pub mod prelude;
