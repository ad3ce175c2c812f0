//! The final hand-off into the target. This is the one spot that can't be
//! expressed in the language's control-flow model, so it stays as small as
//! possible: load the fabricated stack pointer, clear the argument registers,
//! branch.

/// Transfers control to `entry` with the stack pointer set to
/// `stack_pointer`. Registers x0–x3 are zeroed; everything else is left as
/// the ABI allows — undefined.
///
/// # Safety
/// `entry` must be the biased entry point of a fully mapped image and
/// `stack_pointer` the 16-byte-aligned result of stack fabrication. Nothing
/// of the caller survives: its stack and heap are unreachable once the branch
/// happens, so this must be the last thing the process does as itself.
#[cfg(target_arch = "aarch64")]
pub unsafe fn enter_image(entry: usize, stack_pointer: usize) -> ! {
    // x16/x17 are the intra-procedure scratch registers, safe to burn here.
    core::arch::asm!(
        "mov sp, x17",
        "mov x0, xzr",
        "mov x1, xzr",
        "mov x2, xzr",
        "mov x3, xzr",
        "br x16",
        in("x16") entry,
        in("x17") stack_pointer,
        options(noreturn),
    )
}

/// Mapping and stack fabrication work anywhere, but only an AArch64 host can
/// actually enter an AArch64 image.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn enter_image(entry: usize, stack_pointer: usize) -> ! {
    let _ = (entry, stack_pointer);
    unreachable!("image entry is only implemented for AArch64 hosts")
}
