//! Materialises the loadable segments of an image into the current address
//! space.
//!
//! The mapper reserves one contiguous anonymous range covering everything the
//! image wants, so a position-independent image keeps its internal layout no
//! matter where the reservation lands. Each loadable segment is then replaced
//! with fresh writable pages, filled from the file, and finally flipped to
//! the permissions the segment declares. Reading the bytes in rather than
//! mapping the file directly handles unaligned file offsets, partial final
//! pages, and the zero-filled tail uniformly.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::fs::FileExt;

use charon_elf::prelude::*;
use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use snafu::prelude::*;

use crate::error::*;

/// Result of mapping one image.
#[derive(Clone, Copy, Debug)]
pub struct LoadedImage {
    /// Constant added to every virtual address the file states to obtain the
    /// address it was actually mapped at. Zero for fixed-address images.
    pub load_bias: usize,
    /// Entry point with the load bias applied.
    pub entry: usize,
    /// Address of the program header table with the load bias applied.
    pub table_address: usize,
    /// Stride of one program header table entry, as stated by the file.
    pub table_entry_size: u16,
    /// Number of program header table entries.
    pub table_count: u16,
}

/// Returns the page size the host reports, falling back to 4 KiB.
#[must_use]
pub fn page_size() -> usize {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(value)) if value > 0 => value as usize,
        _ => 4096,
    }
}

pub(crate) const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    align_down(value + align - 1, align)
}

/// Opens, validates, and maps an image file end to end, returning the mapped
/// image and its program header table. `path` is only used in diagnostics.
///
/// # Errors
/// Any failure is fatal to the launch: an unreadable file, a header or table
/// that fails validation, or a mapping refused by the host.
pub fn load_object(file: &File, path: &str) -> Result<(LoadedImage, Vec<ProgramHeader>)> {
    let mut header_bytes = [0u8; ImageHeader::SIZE];
    file.read_exact_at(&mut header_bytes, 0).context(ImageOpenSnafu { path })?;
    let header = ImageHeader::read(&header_bytes).context(ImageMalformedSnafu)?;
    header.validate().context(ImageMalformedSnafu)?;

    let table_size =
        usize::from(header.table_entry_size()) * usize::from(header.table_count());
    let mut table_bytes = vec![0u8; table_size];
    file.read_exact_at(&mut table_bytes, header.table_offset())
        .context(ImageOpenSnafu { path })?;
    let table = read_table(&table_bytes, header).context(TableMalformedSnafu)?;

    let image = map_image(file, header, &table)?;
    log::debug!(
        "mapped {} at bias {:#x}, entry {:#x}",
        path,
        image.load_bias,
        image.entry
    );
    Ok((image, table))
}

/// Maps every loadable segment of a parsed image.
///
/// The correctness contract: after this returns, every address in a loadable
/// segment's biased `[address, address + mem_size)` range holds either the
/// file's bytes or zero, and its pages carry exactly the declared permission
/// bits.
///
/// A fixed-address image is mapped at exactly the addresses it states — the
/// reservation only probes that a range of the right size exists, and is
/// released again. This tramples anything already living at those addresses
/// and will usually fail on hosts where everything is position-independent;
/// such images are rare enough on this platform that the limitation stands.
///
/// Consecutive segments close enough to share a final page would have that
/// page re-zeroed by the later mapping; real AArch64 images align segments
/// far beyond the page size, so the case does not arise.
///
/// # Errors
/// Returns [`Error::EmptyImage`] if nothing is loadable, otherwise any mmap,
/// mprotect, or read failure as [`Error::MappingFailed`] /
/// [`Error::SegmentRead`].
pub fn map_image(
    file: &File,
    header: &ImageHeader,
    table: &[ProgramHeader],
) -> Result<LoadedImage> {
    let page = page_size();
    let kind = header.object_kind().context(ImageMalformedSnafu)?;
    let (min_address, max_address) = load_bounds(table).context(EmptyImageSnafu)?;
    let min_page = align_down(min_address as usize, page);
    let max_page = align_up(max_address as usize, page);
    ensure!(max_page > min_page, EmptyImageSnafu);
    let span = max_page - min_page;

    // SAFETY: a fresh anonymous PROT_NONE mapping with no fixed address.
    let reservation = unsafe {
        mmap_anonymous(
            None,
            NonZeroUsize::new(span).unwrap(),
            ProtFlags::PROT_NONE,
            MapFlags::MAP_PRIVATE,
        )
    }
    .context(MappingFailedSnafu { address: min_address })?;

    // Two's complement: the reservation may land below the stated addresses,
    // biased addresses are computed with wrapping adds throughout.
    let load_bias = match kind {
        ObjectKind::Dynamic => (reservation.as_ptr() as usize).wrapping_sub(min_page),
        ObjectKind::Executable => {
            // The image insists on its absolute addresses; the reservation
            // only served as a probe.
            // SAFETY: releasing the mapping created above, full length.
            unsafe { munmap(reservation, span) }
                .context(MappingFailedSnafu { address: min_address })?;
            ensure!(min_page != 0, ZeroPageMappingSnafu);
            0
        }
    };

    for segment in table.iter().filter(|segment| segment.is_load()) {
        map_segment(file, segment, load_bias, page)?;
    }

    Ok(LoadedImage {
        load_bias,
        entry: load_bias.wrapping_add(header.entry() as usize),
        table_address: load_bias.wrapping_add(header.table_offset() as usize),
        table_entry_size: header.table_entry_size(),
        table_count: header.table_count(),
    })
}

fn map_segment(
    file: &File,
    segment: &ProgramHeader,
    load_bias: usize,
    page: usize,
) -> Result<()> {
    let mem_size = segment.mem_size() as usize;
    if mem_size == 0 {
        return Ok(());
    }

    let start = load_bias.wrapping_add(segment.address() as usize);
    let page_start = align_down(start, page);
    let page_end = align_up(start + mem_size, page);
    let span = page_end - page_start;

    // SAFETY: fixed-address anonymous mapping inside the reservation (or at
    // the absolute addresses a fixed image demands); page_start can't be zero
    // because the zero page was refused above.
    let pages = unsafe {
        mmap_anonymous(
            Some(NonZeroUsize::new(page_start).unwrap()),
            NonZeroUsize::new(span).unwrap(),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED,
        )
    }
    .context(MappingFailedSnafu { address: segment.address() })?;

    let file_size = segment.file_size() as usize;
    if file_size > 0 {
        // SAFETY: the pages above cover [start, start + mem_size) and are writable
        let contents = unsafe { core::slice::from_raw_parts_mut(start as *mut u8, file_size) };
        file.read_exact_at(contents, segment.offset()).context(SegmentReadSnafu {
            offset: segment.offset(),
            length: segment.file_size(),
        })?;
    }

    // Fresh anonymous pages are already zero; the explicit fill keeps the
    // zero-tail contract independent of where the bytes came from.
    if mem_size > file_size {
        // SAFETY: same mapping as above, tail portion
        let tail = unsafe {
            core::slice::from_raw_parts_mut((start + file_size) as *mut u8, mem_size - file_size)
        };
        tail.fill(0);
    }

    // SAFETY: flipping the permissions of the mapping created above.
    unsafe { mprotect(pages, span, protection(segment.flags())) }
        .context(MappingFailedSnafu { address: segment.address() })?;

    log::trace!(
        "segment {:#x}..{:#x} ({:?}) materialised at {:#x}",
        segment.address(),
        segment.address() + segment.mem_size(),
        segment.flags(),
        start
    );
    Ok(())
}

fn protection(flags: SegmentFlags) -> ProtFlags {
    let mut protection = ProtFlags::PROT_NONE;
    if flags.contains(SegmentFlags::READ) {
        protection |= ProtFlags::PROT_READ;
    }
    if flags.contains(SegmentFlags::WRITE) {
        protection |= ProtFlags::PROT_WRITE;
    }
    if flags.contains(SegmentFlags::EXECUTE) {
        protection |= ProtFlags::PROT_EXEC;
    }
    protection
}
