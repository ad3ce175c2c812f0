//! Resolves the dynamic interpreter an image asks for.
//!
//! A dynamically linked image names its interpreter (the dynamic linker) in a
//! dedicated segment. When one is present the interpreter is loaded as a
//! second, independently biased image and receives control first; the image's
//! own entry point only travels in the auxiliary vector. Statically linked
//! images have no such segment and are entered directly.

use std::ffi::OsString;
use std::fs::File;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::FileExt;

use charon_elf::prelude::*;
use snafu::prelude::*;

use crate::error::*;
use crate::mapper::{self, LoadedImage};

/// Where execution starts, and what to advertise about it.
#[derive(Clone, Copy, Debug)]
pub struct Resolved {
    /// Address control is transferred to: the interpreter's biased entry
    /// point when one exists, the image's own otherwise.
    pub jump_target: usize,
    /// The interpreter's load bias, if an interpreter was mapped.
    pub interpreter_base: Option<usize>,
}

/// Scans the image's program header table for an interpreter request and, if
/// one is present, loads the interpreter next to the already-mapped image.
///
/// # Errors
/// Returns [`Error::InterpreterMissing`] when the named interpreter cannot be
/// opened, validated, or mapped. An image without an interpreter request
/// cannot fail here.
pub fn resolve(file: &File, table: &[ProgramHeader], image: &LoadedImage) -> Result<Resolved> {
    let Some(request) = table.iter().find(|segment| segment.kind() == Some(SegmentKind::Interp))
    else {
        return Ok(Resolved { jump_target: image.entry, interpreter_base: None });
    };

    let path = read_interpreter_path(file, request)?;
    let interpreter = load_interpreter(&path).context(InterpreterMissingSnafu { path: path.as_str() })?;
    log::debug!("interpreter {path} mapped at bias {:#x}", interpreter.load_bias);

    Ok(Resolved {
        jump_target: interpreter.entry,
        interpreter_base: Some(interpreter.load_bias),
    })
}

/// Reads the NUL-terminated interpreter path out of the image file. Images
/// that omit the terminator are tolerated.
fn read_interpreter_path(file: &File, request: &ProgramHeader) -> Result<String> {
    let length = request.file_size() as usize;
    let mut raw = vec![0u8; length];
    file.read_exact_at(&mut raw, request.offset()).context(SegmentReadSnafu {
        offset: request.offset(),
        length: request.file_size(),
    })?;

    let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
    raw.truncate(end);
    Ok(OsString::from_vec(raw).to_string_lossy().into_owned())
}

fn load_interpreter(path: &str) -> Result<LoadedImage> {
    let file = File::open(path).context(ImageOpenSnafu { path })?;
    let (interpreter, _) = mapper::load_object(&file, path)?;
    Ok(interpreter)
}
