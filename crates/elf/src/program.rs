//! Adds support for reading the program header table of an executable image.
//!
//! Each entry describes one segment of the file. The launcher only ever acts
//! on two kinds: [`Load`](SegmentKind::Load) segments, which are materialised
//! into the address space, and the [`Interp`](SegmentKind::Interp) segment,
//! which names the dynamic interpreter that should receive control instead of
//! the image itself. Everything else is carried through untouched so the
//! interpreter can make its own decisions about it.
//!
//! # Format
//! One table entry, stored little-endian:
//!
//! | Offset | Field | Type | Notes |
//! |--------|-------|------|-------|
//! | 0x00 | Kind           | u32 | See [`SegmentKind`]. |
//! | 0x04 | Flags          | u32 | Read/write/execute bits, see [`SegmentFlags`]. |
//! | 0x08 | File offset    | u64 | Where the segment's bytes start on file. |
//! | 0x10 | Virtual address| u64 | Where the segment wants to live, before any load bias. |
//! | 0x18 | Physical address | u64 | Meaningless on this platform. |
//! | 0x20 | Size on file   | u64 | May be smaller than the size in memory. |
//! | 0x28 | Size in memory | u64 | The tail beyond the file size is zero-filled. |
//! | 0x30 | Alignment      | u64 | Power of two the segment wants its pages aligned to. |

use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use snafu::prelude::*;
use zerocopy::{FromBytes, Immutable, KnownLayout, LittleEndian, Unaligned, U32, U64};

use crate::header::ImageHeader;

#[cfg(not(feature = "std"))]
use crate::no_std::*;

/// Error conditions for when reading a program header table.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if the stated table does not fit the input.
    #[snafu(display("Program header table out of bounds!"))]
    TableOutOfBounds,
    /// Thrown if the stated entry stride cannot hold one entry.
    #[snafu(display("Invalid program header entry size {found}!"))]
    InvalidEntrySize { found: u16 },
    /// Thrown if a loadable segment declares more file bytes than memory.
    #[snafu(display(
        "Segment {index} declares {file_size:#X} file bytes but only {mem_size:#X} bytes of memory!"
    ))]
    SegmentSizeMismatch { index: u16, file_size: u64, mem_size: u64 },
    /// Thrown if loadable segments are not in ascending address order.
    #[snafu(display("Segment {index} is out of ascending address order!"))]
    SegmentOrder { index: u16 },
}
type Result<T> = core::result::Result<T, Error>;

/// Segment kinds with defined meaning on this platform. The launcher acts on
/// [`Load`](Self::Load) and [`Interp`](Self::Interp) and ignores the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum SegmentKind {
    /// Unused entry.
    Null = 0,
    /// Bytes to place into the address space.
    Load = 1,
    /// Dynamic linking metadata, interpreted by the interpreter.
    Dynamic = 2,
    /// Path of the dynamic interpreter that should receive control.
    Interp = 3,
    /// Auxiliary notes.
    Note = 4,
    /// Location of the program header table itself.
    Phdr = 6,
    /// Thread-local storage template.
    Tls = 7,
}

#[derive(FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct SegmentFlags(u32);

bitflags! {
    impl SegmentFlags: u32 {
        /// Pages of this segment may be executed.
        const EXECUTE = 1 << 0;
        /// Pages of this segment may be written.
        const WRITE = 1 << 1;
        /// Pages of this segment may be read.
        const READ = 1 << 2;
    }
}

/// One entry of the program header table.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ProgramHeader {
    p_type: U32<LittleEndian>,
    p_flags: U32<LittleEndian>,
    p_offset: U64<LittleEndian>,
    p_vaddr: U64<LittleEndian>,
    p_paddr: U64<LittleEndian>,
    p_filesz: U64<LittleEndian>,
    p_memsz: U64<LittleEndian>,
    p_align: U64<LittleEndian>,
}

impl ProgramHeader {
    /// Size of one entry on file; the stated stride may be larger.
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Returns the segment kind, or [`None`] for kinds this platform gives no
    /// meaning to (OS- and machine-specific ranges).
    #[must_use]
    pub fn kind(&self) -> Option<SegmentKind> {
        SegmentKind::try_from(self.p_type.get()).ok()
    }

    /// Returns whether this segment is materialised into the address space.
    #[must_use]
    pub fn is_load(&self) -> bool {
        self.kind() == Some(SegmentKind::Load)
    }

    /// Returns the permission bits the segment's pages end up with.
    #[must_use]
    pub fn flags(&self) -> SegmentFlags {
        zerocopy::transmute!(self.p_flags.get())
    }

    /// File offset the segment's bytes start at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.p_offset.get()
    }

    /// Virtual address the segment wants, before any load bias.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.p_vaddr.get()
    }

    /// Number of bytes backed by the file.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.p_filesz.get()
    }

    /// Number of bytes the segment occupies in memory.
    #[must_use]
    pub fn mem_size(&self) -> u64 {
        self.p_memsz.get()
    }

    /// Checks the invariants a single entry must uphold.
    fn verify(&self, index: u16) -> Result<()> {
        if self.is_load() {
            ensure!(
                self.mem_size() >= self.file_size(),
                SegmentSizeMismatchSnafu {
                    index,
                    file_size: self.file_size(),
                    mem_size: self.mem_size(),
                }
            );
        }
        Ok(())
    }
}

/// Reads a program header table using the geometry the image header declares.
///
/// `input` must start at the table's first entry, i.e. the caller slices the
/// file at [`table_offset`](ImageHeader::table_offset). Entries wider than
/// [`ProgramHeader::SIZE`] are tolerated and their extra bytes ignored.
///
/// # Errors
/// Returns:
/// * [`InvalidEntrySize`](Error::InvalidEntrySize) if the stated stride is too small
/// * [`TableOutOfBounds`](Error::TableOutOfBounds) if the table does not fit `input`
/// * [`SegmentSizeMismatch`](Error::SegmentSizeMismatch) if a loadable segment
///   shrinks in memory
/// * [`SegmentOrder`](Error::SegmentOrder) if loadable segments are not in
///   ascending address order
pub fn read_table(input: &[u8], header: &ImageHeader) -> Result<Vec<ProgramHeader>> {
    let stride = usize::from(header.table_entry_size());
    ensure!(
        stride >= ProgramHeader::SIZE,
        InvalidEntrySizeSnafu { found: header.table_entry_size() }
    );

    let count = usize::from(header.table_count());
    let table_size = count.checked_mul(stride).context(TableOutOfBoundsSnafu)?;
    ensure!(table_size <= input.len(), TableOutOfBoundsSnafu);

    let mut entries = Vec::with_capacity(count);
    let mut previous = 0;
    for index in 0..count {
        // Infallible, the whole table was bounds-checked above
        let (entry, _) = ProgramHeader::read_from_prefix(&input[index * stride..]).unwrap();
        entry.verify(index as u16)?;
        if entry.is_load() {
            ensure!(entry.address() >= previous, SegmentOrderSnafu { index: index as u16 });
            previous = entry.address();
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Returns the lowest and one-past-highest virtual address any loadable
/// segment touches, unrounded, or [`None`] if nothing is loadable.
#[must_use]
pub fn load_bounds(entries: &[ProgramHeader]) -> Option<(u64, u64)> {
    let mut bounds: Option<(u64, u64)> = None;
    for entry in entries.iter().filter(|entry| entry.is_load()) {
        let start = entry.address();
        let end = start.saturating_add(entry.mem_size());
        bounds = Some(match bounds {
            Some((low, high)) => (low.min(start), high.max(end)),
            None => (start, end),
        });
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MAGIC;

    fn entry_bytes(
        kind: u32,
        flags: u32,
        offset: u64,
        address: u64,
        file_size: u64,
        mem_size: u64,
    ) -> [u8; ProgramHeader::SIZE] {
        let mut raw = [0u8; ProgramHeader::SIZE];
        raw[0..4].copy_from_slice(&kind.to_le_bytes());
        raw[4..8].copy_from_slice(&flags.to_le_bytes());
        raw[8..16].copy_from_slice(&offset.to_le_bytes());
        raw[16..24].copy_from_slice(&address.to_le_bytes());
        raw[32..40].copy_from_slice(&file_size.to_le_bytes());
        raw[40..48].copy_from_slice(&mem_size.to_le_bytes());
        raw[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        raw
    }

    fn header_for(count: u16, stride: u16) -> [u8; ImageHeader::SIZE] {
        let mut raw = [0u8; ImageHeader::SIZE];
        raw[0..4].copy_from_slice(&MAGIC);
        raw[4] = 2;
        raw[5] = 1;
        raw[16..18].copy_from_slice(&3u16.to_le_bytes());
        raw[18..20].copy_from_slice(&0xB7u16.to_le_bytes());
        raw[54..56].copy_from_slice(&stride.to_le_bytes());
        raw[56..58].copy_from_slice(&count.to_le_bytes());
        raw
    }

    #[test]
    fn reads_a_well_formed_table() {
        let raw_header = header_for(3, 56);
        let header = ImageHeader::read(&raw_header).unwrap();

        let mut table = Vec::new();
        table.extend_from_slice(&entry_bytes(1, 0b101, 0, 0x0000, 0x200, 0x200));
        table.extend_from_slice(&entry_bytes(3, 0b100, 0x200, 0x0000, 0x10, 0x10));
        table.extend_from_slice(&entry_bytes(1, 0b110, 0x400, 0x10000, 0x100, 0x2100));

        let entries = read_table(&table, header).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind(), Some(SegmentKind::Load));
        assert_eq!(entries[0].flags(), SegmentFlags::READ | SegmentFlags::EXECUTE);
        assert_eq!(entries[1].kind(), Some(SegmentKind::Interp));
        assert_eq!(entries[2].flags(), SegmentFlags::READ | SegmentFlags::WRITE);
        assert_eq!(entries[2].mem_size(), 0x2100);

        assert_eq!(load_bounds(&entries), Some((0, 0x12100)));
    }

    #[test]
    fn tolerates_wide_strides_and_unknown_kinds() {
        let raw_header = header_for(2, 64);
        let header = ImageHeader::read(&raw_header).unwrap();

        let mut table = Vec::new();
        table.extend_from_slice(&entry_bytes(1, 0b100, 0, 0x1000, 0x80, 0x80));
        table.extend_from_slice(&[0xAA; 8]); // stride padding
        table.extend_from_slice(&entry_bytes(0x6474_E551, 0b110, 0, 0, 0, 0)); // GNU_STACK
        table.extend_from_slice(&[0xAA; 8]);

        let entries = read_table(&table, header).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind(), None);
        assert_eq!(load_bounds(&entries), Some((0x1000, 0x1080)));
    }

    #[test]
    fn rejects_a_short_table() {
        let raw_header = header_for(2, 56);
        let header = ImageHeader::read(&raw_header).unwrap();
        let table = entry_bytes(1, 0b100, 0, 0, 0x10, 0x10);
        assert!(matches!(read_table(&table, header), Err(Error::TableOutOfBounds)));
    }

    #[test]
    fn rejects_a_narrow_stride() {
        let raw_header = header_for(1, 32);
        let header = ImageHeader::read(&raw_header).unwrap();
        let table = entry_bytes(1, 0b100, 0, 0, 0x10, 0x10);
        assert!(matches!(
            read_table(&table, header),
            Err(Error::InvalidEntrySize { found: 32 })
        ));
    }

    #[test]
    fn rejects_a_segment_that_shrinks_in_memory() {
        let raw_header = header_for(1, 56);
        let header = ImageHeader::read(&raw_header).unwrap();
        let table = entry_bytes(1, 0b100, 0, 0, 0x200, 0x100);
        assert!(matches!(
            read_table(&table, header),
            Err(Error::SegmentSizeMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_descending_load_addresses() {
        let raw_header = header_for(2, 56);
        let header = ImageHeader::read(&raw_header).unwrap();
        let mut table = Vec::new();
        table.extend_from_slice(&entry_bytes(1, 0b100, 0, 0x2000, 0x10, 0x10));
        table.extend_from_slice(&entry_bytes(1, 0b100, 0, 0x1000, 0x10, 0x10));
        assert!(matches!(read_table(&table, header), Err(Error::SegmentOrder { index: 1 })));
    }

    #[test]
    fn no_loadable_segments_means_no_bounds() {
        assert_eq!(load_bounds(&[]), None);
    }
}
