//! Builds synthetic AArch64 images for the loader tests: a real file header,
//! a program header table, and segment payloads, assembled byte by byte.

use std::io::Write;
use std::path::PathBuf;

/// One loadable segment: the address it wants, the bytes backing it on file,
/// its full size in memory, and its permission bits.
pub struct Segment {
    pub address: u64,
    pub file_bytes: Vec<u8>,
    pub mem_size: u64,
    pub flags: u32,
}

const HEADER_SIZE: usize = 64;
const ENTRY_SIZE: usize = 56;

/// Assembles an image. `kind` is 2 for fixed-address, 3 for
/// position-independent; segment payloads are packed after the headers in
/// declaration order.
pub fn build_image(kind: u16, entry: u64, interpreter: Option<&str>, segments: &[Segment]) -> Vec<u8> {
    let interpreter = interpreter.map(|path| {
        let mut raw = path.as_bytes().to_vec();
        raw.push(0);
        raw
    });

    let count = segments.len() + usize::from(interpreter.is_some());
    let mut payload_offset = (HEADER_SIZE + count * ENTRY_SIZE) as u64;
    let mut table = Vec::new();
    let mut payload = Vec::new();

    if let Some(raw) = &interpreter {
        table.extend_from_slice(&entry_bytes(3, 0b100, payload_offset, 0, raw.len() as u64, raw.len() as u64));
        payload.extend_from_slice(raw);
        payload_offset += raw.len() as u64;
    }
    for segment in segments {
        table.extend_from_slice(&entry_bytes(
            1,
            segment.flags,
            payload_offset,
            segment.address,
            segment.file_bytes.len() as u64,
            segment.mem_size,
        ));
        payload.extend_from_slice(&segment.file_bytes);
        payload_offset += segment.file_bytes.len() as u64;
    }

    let mut image = Vec::new();
    image.extend_from_slice(b"\x7fELF");
    image.extend_from_slice(&[2, 1, 1, 0]); // 64-bit, little-endian, version 1
    image.extend_from_slice(&[0u8; 8]);
    image.extend_from_slice(&kind.to_le_bytes());
    image.extend_from_slice(&0xB7u16.to_le_bytes()); // AArch64
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&(HEADER_SIZE as u64).to_le_bytes()); // table offset
    image.extend_from_slice(&0u64.to_le_bytes()); // section headers, unused
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
    image.extend_from_slice(&(ENTRY_SIZE as u16).to_le_bytes());
    image.extend_from_slice(&(count as u16).to_le_bytes());
    image.extend_from_slice(&[0u8; 6]);
    assert_eq!(image.len(), HEADER_SIZE);

    image.extend_from_slice(&table);
    image.extend_from_slice(&payload);
    image
}

fn entry_bytes(
    kind: u32,
    flags: u32,
    offset: u64,
    address: u64,
    file_size: u64,
    mem_size: u64,
) -> [u8; ENTRY_SIZE] {
    let mut raw = [0u8; ENTRY_SIZE];
    raw[0..4].copy_from_slice(&kind.to_le_bytes());
    raw[4..8].copy_from_slice(&flags.to_le_bytes());
    raw[8..16].copy_from_slice(&offset.to_le_bytes());
    raw[16..24].copy_from_slice(&address.to_le_bytes());
    raw[32..40].copy_from_slice(&file_size.to_le_bytes());
    raw[40..48].copy_from_slice(&mem_size.to_le_bytes());
    raw[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
    raw
}

/// Writes an image under a collision-free name in the temp directory.
pub fn write_image(name: &str, image: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("charon-{name}-{}", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(image).unwrap();
    path
}
