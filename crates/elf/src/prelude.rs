//! Convenient re-exports of commonly used data types, designed to make crate usage painless.
//!
//! For example, you can refer to [`ImageHeader`], but you have to use [`header::Error`].
//!
//! The contents of this module can be used by including the following in any module:
//! ```
//! use charon_elf::prelude::*;
//! ```

pub use crate::header::{ImageHeader, ObjectKind};

pub mod header {
    pub use crate::header::{Error, MAGIC};
}

pub use crate::program::{load_bounds, read_table, ProgramHeader, SegmentFlags, SegmentKind};

pub mod program {
    pub use crate::program::Error;
}
