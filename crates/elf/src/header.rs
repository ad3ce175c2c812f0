//! Adds support for reading the file header of a 64-bit executable image.
//!
//! # Format
//! The header starts with a 16-byte identification block that is
//! endianness-agnostic, followed by the fields describing the rest of the
//! file, stored little-endian:
//!
//! | Offset | Field | Type | Notes |
//! |--------|-------|------|-------|
//! | 0x00 | Identification | u8\[16\] | Magic, file class, data encoding, ABI. See [`Identification`]. |
//! | 0x10 | Object kind    | u16      | 2 for a fixed-address executable, 3 for position-independent. |
//! | 0x12 | Machine        | u16      | 0xB7 for AArch64, the only machine this launcher accepts. |
//! | 0x14 | Version        | u32      | Always 1. |
//! | 0x18 | Entry point    | u64      | Virtual address execution starts at, before any load bias. |
//! | 0x20 | Phdr offset    | u64      | File offset of the program header table. |
//! | 0x28 | Shdr offset    | u64      | Section headers; never read by the launcher. |
//! | 0x30 | Flags          | u32      | Machine flags, unused on AArch64. |
//! | 0x34 | Header size    | u16      | Size of this header. |
//! | 0x36 | Phdr entry size| u16      | Stride of one program header table entry. |
//! | 0x38 | Phdr count     | u16      | Number of program header table entries. |
//! | 0x3A | Shdr entry size| u16      | Ignored. |
//! | 0x3C | Shdr count     | u16      | Ignored. |
//! | 0x3E | String index   | u16      | Ignored. |
//!
//! # Validation
//! [`ImageHeader::validate`] performs the launch-gating checks in a fixed
//! order: magic, class, data encoding, machine. Program headers are checked
//! separately by [`read_table`](crate::program::read_table) so a rejection
//! always names the first thing that is actually wrong with the file.

use num_enum::TryFromPrimitive;
use snafu::prelude::*;
use zerocopy::{FromBytes, Immutable, KnownLayout, LittleEndian, Unaligned, U16, U32, U64};

/// Error conditions for when reading an image header.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if the input ends before the header does.
    #[snafu(display("Unexpected End-Of-File!"))]
    EndOfFile,
    /// Thrown if the header contains a magic number other than `\x7fELF`.
    #[snafu(display("Invalid Magic! Expected {:?}.", MAGIC))]
    InvalidMagic,
    /// Thrown if the image is not 64-bit.
    #[snafu(display("Unsupported file class {found:#X}! Expected a 64-bit image."))]
    UnsupportedClass { found: u8 },
    /// Thrown if the image is not little-endian.
    #[snafu(display("Unsupported data encoding {found:#X}! Expected little-endian."))]
    UnsupportedEncoding { found: u8 },
    /// Thrown if the image is built for any machine but AArch64.
    #[snafu(display("Unsupported machine {found:#X}! Expected AArch64."))]
    UnsupportedMachine { found: u16 },
    /// Thrown if the image is neither a fixed-address executable nor
    /// position-independent.
    #[snafu(display("Unsupported object kind {found:#X}!"))]
    UnsupportedObjectKind { found: u16 },
}
type Result<T> = core::result::Result<T, Error>;

/// Unique identifier that tells us if we're reading an executable image.
pub const MAGIC: [u8; 4] = *b"\x7fELF";

/// 64-bit file class.
const CLASS_64BIT: u8 = 2;
/// Little-endian data encoding.
const ENCODING_LITTLE: u8 = 1;
/// Machine identifier for AArch64.
const MACHINE_AARCH64: u16 = 0xB7;

/// How an image expects to be placed into the address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum ObjectKind {
    /// Demands the exact virtual addresses stated in its program headers.
    Executable = 2,
    /// Position-independent; runs at any load bias the mapper picks.
    Dynamic = 3,
}

/// Identification block at the very start of every image.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct Identification {
    /// Magic, should be `\x7fELF`
    magic: [u8; 4],
    /// File class, 1 for 32-bit and 2 for 64-bit
    class: u8,
    /// Data encoding, 1 for little-endian and 2 for big-endian
    data: u8,
    /// Identification version, always 1
    version: u8,
    /// OS/ABI the image targets, 0 for System V
    os_abi: u8,
    /// Version of the OS/ABI above
    abi_version: u8,
    /// Reserved, must be zero
    padding: [u8; 7],
}

/// File header of a 64-bit executable image.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct ImageHeader {
    ident: Identification,
    e_type: U16<LittleEndian>,
    e_machine: U16<LittleEndian>,
    e_version: U32<LittleEndian>,
    e_entry: U64<LittleEndian>,
    e_phoff: U64<LittleEndian>,
    e_shoff: U64<LittleEndian>,
    e_flags: U32<LittleEndian>,
    e_ehsize: U16<LittleEndian>,
    e_phentsize: U16<LittleEndian>,
    e_phnum: U16<LittleEndian>,
    e_shentsize: U16<LittleEndian>,
    e_shnum: U16<LittleEndian>,
    e_shstrndx: U16<LittleEndian>,
}

impl ImageHeader {
    /// Size of the header on file.
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Reads an image header from the start of `input`.
    ///
    /// # Errors
    /// Returns [`EndOfFile`](Error::EndOfFile) if `input` holds fewer than
    /// [`SIZE`](Self::SIZE) bytes.
    pub fn read(input: &[u8]) -> Result<&Self> {
        ensure!(input.len() >= Self::SIZE, EndOfFileSnafu);

        // Infallible, the length was checked and the struct is Unaligned
        let (header, _) = Self::ref_from_prefix(input).unwrap();
        Ok(header)
    }

    /// Checks that the image is something this launcher can map: the magic
    /// number, a 64-bit class, little-endian data, and an AArch64 machine,
    /// in that order.
    ///
    /// # Errors
    /// Returns the error matching the first check that failed.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.ident.magic == MAGIC, InvalidMagicSnafu);
        ensure!(
            self.ident.class == CLASS_64BIT,
            UnsupportedClassSnafu { found: self.ident.class }
        );
        ensure!(
            self.ident.data == ENCODING_LITTLE,
            UnsupportedEncodingSnafu { found: self.ident.data }
        );
        ensure!(
            self.e_machine.get() == MACHINE_AARCH64,
            UnsupportedMachineSnafu { found: self.e_machine.get() }
        );
        Ok(())
    }

    /// Returns whether the image is fixed-address or position-independent.
    ///
    /// # Errors
    /// Returns [`UnsupportedObjectKind`](Error::UnsupportedObjectKind) for
    /// relocatable objects, core dumps, and anything else that can't be
    /// launched.
    pub fn object_kind(&self) -> Result<ObjectKind> {
        ObjectKind::try_from(self.e_type.get())
            .map_err(|_| Error::UnsupportedObjectKind { found: self.e_type.get() })
    }

    /// Virtual address execution starts at, before any load bias is applied.
    #[must_use]
    pub fn entry(&self) -> u64 {
        self.e_entry.get()
    }

    /// File offset of the program header table.
    #[must_use]
    pub fn table_offset(&self) -> u64 {
        self.e_phoff.get()
    }

    /// Stride of one program header table entry.
    #[must_use]
    pub fn table_entry_size(&self) -> u16 {
        self.e_phentsize.get()
    }

    /// Number of program header table entries.
    #[must_use]
    pub fn table_count(&self) -> u16 {
        self.e_phnum.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> [u8; ImageHeader::SIZE] {
        let mut raw = [0u8; ImageHeader::SIZE];
        raw[0..4].copy_from_slice(&MAGIC);
        raw[4] = CLASS_64BIT;
        raw[5] = ENCODING_LITTLE;
        raw[6] = 1;
        raw[16..18].copy_from_slice(&3u16.to_le_bytes()); // position-independent
        raw[18..20].copy_from_slice(&MACHINE_AARCH64.to_le_bytes());
        raw[20..24].copy_from_slice(&1u32.to_le_bytes());
        raw[24..32].copy_from_slice(&0x4321u64.to_le_bytes()); // entry
        raw[32..40].copy_from_slice(&64u64.to_le_bytes()); // phoff
        raw[52..54].copy_from_slice(&64u16.to_le_bytes()); // ehsize
        raw[54..56].copy_from_slice(&56u16.to_le_bytes()); // phentsize
        raw[56..58].copy_from_slice(&2u16.to_le_bytes()); // phnum
        raw
    }

    #[test]
    fn accepts_a_conforming_header() {
        let raw = sample_header();
        let header = ImageHeader::read(&raw).unwrap();
        assert!(header.validate().is_ok());
        assert_eq!(header.object_kind().unwrap(), ObjectKind::Dynamic);
        assert_eq!(header.entry(), 0x4321);
        assert_eq!(header.table_offset(), 64);
        assert_eq!(header.table_entry_size(), 56);
        assert_eq!(header.table_count(), 2);
    }

    #[test]
    fn rejects_a_truncated_header() {
        let raw = sample_header();
        assert!(matches!(ImageHeader::read(&raw[..32]), Err(Error::EndOfFile)));
    }

    #[test]
    fn rejects_in_check_order() {
        let mut raw = sample_header();
        raw[0] = 0x7E;
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(header.validate(), Err(Error::InvalidMagic)));

        let mut raw = sample_header();
        raw[4] = 1; // 32-bit
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(header.validate(), Err(Error::UnsupportedClass { found: 1 })));

        let mut raw = sample_header();
        raw[5] = 2; // big-endian
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(header.validate(), Err(Error::UnsupportedEncoding { found: 2 })));

        let mut raw = sample_header();
        raw[18..20].copy_from_slice(&0x3Eu16.to_le_bytes()); // x86-64
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(header.validate(), Err(Error::UnsupportedMachine { found: 0x3E })));

        // A header that is both corrupt and foreign reports the magic first
        let mut raw = sample_header();
        raw[0] = 0;
        raw[18] = 0x3E;
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(header.validate(), Err(Error::InvalidMagic)));
    }

    #[test]
    fn rejects_unlaunchable_object_kinds() {
        let mut raw = sample_header();
        raw[16..18].copy_from_slice(&1u16.to_le_bytes()); // relocatable
        let header = ImageHeader::read(&raw).unwrap();
        assert!(matches!(
            header.object_kind(),
            Err(Error::UnsupportedObjectKind { found: 1 })
        ));
    }
}
