//! This crate contains the executable-image data model for
//! [Charon](https://crates.io/crates/charon): parsing and validation of 64-bit
//! little-endian AArch64 images, without touching the address space. Mapping
//! the parsed segments into memory is the loader crate's job.

#![deny(unused_crate_dependencies)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
mod no_std {
    extern crate alloc;
    pub use alloc::vec::Vec;
}

// All public modules
pub mod header;
pub mod program;

// Prelude, for convenience
pub mod prelude;
