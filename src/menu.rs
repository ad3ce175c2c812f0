use argp::FromArgs;

/// Top-level command
#[derive(FromArgs, PartialEq, Debug)]
#[argp(description = "Run AArch64 executables inside a fresh pseudo-terminal.")]
pub struct Charon {
    #[argp(option, short = 'v', global, default = "0")]
    #[argp(
        description = "Logging level (0 = Off, 1 = Error, 2 = Warn, 3 = Info, 4 = Debug, 5 = Trace)"
    )]
    pub verbose: usize,

    #[argp(subcommand)]
    pub nested: Modules,
}

/// These are all the operations Charon supports via command line.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
#[non_exhaustive]
pub enum Modules {
    Run(RunOption),
    Inspect(InspectOption),
}

/// Command to launch an image and hand its terminal to the caller.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand, name = "run")]
#[argp(description = "Launch an executable image inside a fresh pseudo-terminal")]
pub struct RunOption {
    #[argp(option, short = 'e')]
    #[argp(
        description = "KEY=VALUE environment entry for the target (repeatable; default: inherit everything)"
    )]
    pub env: Vec<String>,

    //We always need the image itself; everything after it is handed through untouched
    #[argp(positional)]
    #[argp(description = "Executable image to launch")]
    pub image: String,

    #[argp(positional)]
    #[argp(description = "Arguments handed to the image")]
    pub args: Vec<String>,
}

/// Command to print what the loader would do with an image, without running it.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand, name = "inspect")]
#[argp(description = "Parse an image and print its header and segment table")]
pub struct InspectOption {
    #[argp(positional)]
    #[argp(description = "Input file to be processed")]
    pub input: String,
}
