//! Fabricates the initial stack image a freshly launched program expects.
//!
//! # Layout
//! The region is filled from its top downward; the returned stack pointer is
//! the lowest written address. Seen from the stack pointer upward:
//!
//! | Offset | Field | Notes |
//! |--------|-------|-------|
//! | 0x0 | argc | One machine word. |
//! | 0x8 | argv pointers | `argc` pointers into the string block, then NULL. |
//! | — | envp pointers | One per environment entry, then NULL. |
//! | — | auxiliary vector | Key/value word pairs, terminated by a NULL key. |
//! | — | alignment gap | Whatever it takes to keep the stack pointer 16-byte aligned. |
//! | — | random block | 16 bytes from the host's secure source, pointed at by `AT_RANDOM`. |
//! | — | string block | Argument then environment strings, NUL-terminated. |
//!
//! # Ordering
//! The strings are written into the region before any pointer to them is
//! emitted, so every pointer the target reads refers to the string's final
//! resting address. The pointer arrays are written straight into the region,
//! never staged on the launcher's heap — nothing here needs to be freed in
//! the child.

use snafu::prelude::*;

use crate::error::*;
use crate::mapper::{align_down, align_up};

/// One key/value pair of the auxiliary vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuxEntry {
    pub key: u64,
    pub value: u64,
}

impl AuxEntry {
    /// Creates an entry from one of the `AT_*` keys.
    #[must_use]
    pub const fn new(key: libc::c_ulong, value: u64) -> Self {
        Self { key: key as u64, value }
    }
}

/// Number of secure random bytes placed on the stack for `AT_RANDOM`.
pub const RANDOM_BYTES: usize = 16;

/// Required alignment of the stack pointer at entry.
const STACK_ALIGNMENT: usize = 16;

const WORD: usize = core::mem::size_of::<u64>();
const AUX_ENTRY_SIZE: usize = 2 * WORD;

/// Builds the initial stack inside `region` and returns the stack pointer.
///
/// `base` is the address the region occupies in the target's address space;
/// every pointer written into the stack is computed against it, which is what
/// makes the fabricator testable in a plain buffer. The `AT_RANDOM` entry of
/// `auxv` is patched to the address of the random block; the terminating NULL
/// entry is appended here and must not be part of `auxv`.
///
/// The returned stack pointer is 16-byte aligned and addresses the argc word.
///
/// # Errors
/// Returns:
/// * [`Error::StackOverflow`] if the region cannot hold the stack image
/// * [`Error::EmbeddedNul`] if an argument or environment string contains a
///   NUL byte
/// * [`Error::RandomUnavailable`] if the host's randomness source fails
pub fn fabricate(
    region: &mut [u8],
    base: usize,
    argv: &[String],
    envp: &[String],
    auxv: &[AuxEntry],
) -> Result<usize> {
    let strings_size: usize =
        argv.iter().chain(envp.iter()).map(|string| string.len() + 1).sum();
    let aux_size = (auxv.len() + 1) * AUX_ENTRY_SIZE;
    let vectors_size = (argv.len() + envp.len() + 3) * WORD;

    // Covers the worst case of both alignment cuts below.
    let needed = align_up(strings_size, STACK_ALIGNMENT)
        + RANDOM_BYTES
        + aux_size
        + vectors_size
        + 2 * STACK_ALIGNMENT;
    ensure!(
        needed <= region.len(),
        StackOverflowSnafu { needed, available: region.len() }
    );
    for string in argv.iter().chain(envp.iter()) {
        ensure!(!string.as_bytes().contains(&0), EmbeddedNulSnafu);
    }

    let top = base + region.len();
    let string_base = align_down(top - strings_size, STACK_ALIGNMENT);
    let random_base = string_base - RANDOM_BYTES;
    // Rounding down here opens the alignment gap between the auxiliary
    // vector's terminator and the random block.
    let stack_pointer = align_down(random_base - aux_size - vectors_size, STACK_ALIGNMENT);

    write_word(region, base, stack_pointer, argv.len() as u64);
    let (string_cursor, vector_cursor) =
        write_strings(region, base, argv, string_base, stack_pointer + WORD);
    let (_, mut vector_cursor) = write_strings(region, base, envp, string_cursor, vector_cursor);

    let mut random = [0u8; RANDOM_BYTES];
    getrandom::getrandom(&mut random).context(RandomUnavailableSnafu)?;
    write_bytes(region, base, random_base, &random);

    for entry in auxv {
        let value = if entry.key == libc::AT_RANDOM as u64 {
            random_base as u64
        } else {
            entry.value
        };
        write_word(region, base, vector_cursor, entry.key);
        write_word(region, base, vector_cursor + WORD, value);
        vector_cursor += AUX_ENTRY_SIZE;
    }
    write_word(region, base, vector_cursor, 0);
    write_word(region, base, vector_cursor + WORD, 0);

    Ok(stack_pointer)
}

/// Writes one string block plus the NULL-terminated pointer array referring
/// into it, returning both advanced cursors.
fn write_strings(
    region: &mut [u8],
    base: usize,
    strings: &[String],
    mut string_cursor: usize,
    mut vector_cursor: usize,
) -> (usize, usize) {
    for string in strings {
        write_bytes(region, base, string_cursor, string.as_bytes());
        write_bytes(region, base, string_cursor + string.len(), &[0]);
        write_word(region, base, vector_cursor, string_cursor as u64);
        string_cursor += string.len() + 1;
        vector_cursor += WORD;
    }
    write_word(region, base, vector_cursor, 0);
    (string_cursor, vector_cursor + WORD)
}

fn write_word(region: &mut [u8], base: usize, address: usize, value: u64) {
    let offset = address - base;
    region[offset..offset + WORD].copy_from_slice(&value.to_le_bytes());
}

fn write_bytes(region: &mut [u8], base: usize, address: usize, bytes: &[u8]) {
    let offset = address - base;
    region[offset..offset + bytes.len()].copy_from_slice(bytes);
}
