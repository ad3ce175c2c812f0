use snafu::prelude::*;

/// Error conditions when preparing a launch.
///
/// Only the first two can ever reach the caller of
/// [`start_session`](crate::session::start_session); everything else happens
/// in the child after the fork, where it is logged and fatal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The host refused to allocate a pseudo-terminal.
    #[snafu(display("Unable to allocate a pseudo-terminal: {source}"))]
    PtyUnavailable { source: nix::Error },

    /// The host refused to clone the calling process.
    #[snafu(display("Unable to fork: {source}"))]
    ForkFailed { source: nix::Error },

    /// The image file could not be opened or read.
    #[snafu(display("Unable to read image {path}: {source}"))]
    ImageOpen { path: String, source: std::io::Error },

    /// The image header failed validation.
    #[snafu(display("Malformed image: {source}"))]
    ImageMalformed { source: charon_elf::header::Error },

    /// The program header table failed validation.
    #[snafu(display("Malformed program header table: {source}"))]
    TableMalformed { source: charon_elf::program::Error },

    /// The image has nothing to load.
    #[snafu(display("Image has no loadable segments"))]
    EmptyImage,

    /// The image demands a fixed mapping on the zero page.
    #[snafu(display("Image demands a mapping at the zero page"))]
    ZeroPageMapping,

    /// The requested dynamic interpreter could not be launched.
    #[snafu(display("Unable to load interpreter {path}: {source}"))]
    InterpreterMissing {
        path: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// A segment's pages could not be materialised or protected.
    #[snafu(display("Unable to map segment at {address:#X}: {source}"))]
    MappingFailed { address: u64, source: nix::Error },

    /// The image ended before a segment's stated file bytes did.
    #[snafu(display("Unable to read {length:#X} bytes at file offset {offset:#X}: {source}"))]
    SegmentRead { offset: u64, length: u64, source: std::io::Error },

    /// The stack region for the target could not be allocated.
    #[snafu(display("Unable to allocate the program stack: {source}"))]
    StackUnavailable { source: nix::Error },

    /// The fabricated stack image did not fit its region.
    #[snafu(display(
        "Initial stack image needs {needed:#X} bytes but the region only holds {available:#X}"
    ))]
    StackOverflow { needed: usize, available: usize },

    /// An argument or environment string contains an interior NUL byte.
    #[snafu(display("Strings handed to the target cannot contain NUL bytes"))]
    EmbeddedNul,

    /// The host's secure randomness source failed.
    #[snafu(display("Unable to read random bytes: {source}"))]
    RandomUnavailable { source: getrandom::Error },
}

pub type Result<T> = core::result::Result<T, Error>;
