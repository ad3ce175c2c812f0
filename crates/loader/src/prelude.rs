//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use charon_loader::prelude::*;
//! ```

pub use crate::error::Error;
pub use crate::session::{start_session, Session, WaitStatus, STACK_SIZE};
