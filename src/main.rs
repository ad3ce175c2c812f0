use std::io::prelude::*;
use std::path::Path;

use anyhow::Result;
use charon_elf::prelude::*;
use charon_loader::prelude::*;
use env_logger::Builder;
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;

mod menu;
use menu::Modules;

fn color_level(level: Level) -> String {
    match level {
        Level::Error => level.red().to_string(),
        Level::Warn => level.yellow().to_string(),
        Level::Info => level.green().to_string(),
        Level::Debug => level.blue().to_string(),
        Level::Trace => level.purple().to_string(),
    }
}

const fn level_filter(verbose: usize) -> LevelFilter {
    match verbose {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        //default to off
        _ => LevelFilter::Off,
    }
}

fn main() -> Result<()> {
    //Parse command line input
    let args: menu::Charon = argp::parse_args_or_exit(argp::DEFAULT);

    // Build up a logger with custom formatting and set it to the verbosity from the command line args
    if args.verbose != 0 {
        Builder::new()
            .format(|buf, record| {
                writeln!(buf, "{} {}", color_level(record.level()), record.args())
            })
            .filter(None, level_filter(args.verbose))
            .init();
    }

    match args.nested {
        Modules::Run(params) => run(params),
        Modules::Inspect(params) => inspect(params),
    }
}

fn run(params: menu::RunOption) -> Result<()> {
    let mut argv = vec![params.image.clone()];
    argv.extend(params.args.iter().cloned());

    // An explicit environment replaces the inherited one entirely, matching
    // what the loader hands the target either way
    let envp: Vec<String> = if params.env.is_empty() {
        std::env::vars().map(|(key, value)| format!("{key}={value}")).collect()
    } else {
        params.env.clone()
    };

    let session = start_session(Path::new(&params.image), &argv, &envp)
        .ok_or_else(|| anyhow::anyhow!("unable to start a session for {}", params.image))?;
    log::info!("session started as pid {}", session.pid);

    // Keyboard input goes down on its own thread; it dies with the process
    let mut keyboard = std::fs::File::from(session.master.try_clone()?);
    std::thread::spawn(move || {
        let _ = std::io::copy(&mut std::io::stdin().lock(), &mut keyboard);
    });

    let mut terminal = std::fs::File::from(session.master.try_clone()?);
    let mut stdout = std::io::stdout();
    let mut buffer = [0u8; 4096];
    loop {
        match terminal.read(&mut buffer) {
            Ok(0) => break,
            Ok(length) => {
                stdout.write_all(&buffer[..length])?;
                stdout.flush()?;
            }
            // The master reports an error once the child side hangs up
            Err(_) => break,
        }
    }

    match session.wait() {
        Ok(WaitStatus::Exited(_, code)) => {
            log::info!("child exited with status {code}");
            std::process::exit(code);
        }
        Ok(status) => {
            log::warn!("child ended abnormally: {status:?}");
            std::process::exit(1);
        }
        Err(error) => Err(anyhow::anyhow!("unable to reap the child: {error}")),
    }
}

fn inspect(params: menu::InspectOption) -> Result<()> {
    let data = std::fs::read(&params.input)?;
    let header = ImageHeader::read(&data)?;
    header.validate()?;

    println!("{}: AArch64 executable image", params.input);
    println!("  kind:    {:?}", header.object_kind()?);
    println!("  entry:   {:#x}", header.entry());

    let offset = usize::try_from(header.table_offset())?;
    let table = read_table(data.get(offset..).unwrap_or_default(), header)?;
    if let Some((low, high)) = load_bounds(&table) {
        println!("  extent:  {low:#x}..{high:#x}");
    }

    println!("  segments:");
    for entry in &table {
        let kind = match entry.kind() {
            Some(kind) => format!("{kind:?}"),
            None => "Other".to_string(),
        };
        println!(
            "    {:<8} {} address {:#010x} file {:#8x} mem {:#8x}",
            kind,
            permissions(entry.flags()),
            entry.address(),
            entry.file_size(),
            entry.mem_size()
        );
    }

    if let Some(request) = table.iter().find(|entry| entry.kind() == Some(SegmentKind::Interp)) {
        let start = usize::try_from(request.offset())?;
        let end = start + usize::try_from(request.file_size())?;
        if let Some(raw) = data.get(start..end) {
            let path = raw.split(|&byte| byte == 0).next().unwrap_or_default();
            println!("  interpreter: {}", String::from_utf8_lossy(path));
        }
    }
    Ok(())
}

fn permissions(flags: SegmentFlags) -> String {
    format!(
        "{}{}{}",
        if flags.contains(SegmentFlags::READ) { 'r' } else { '-' },
        if flags.contains(SegmentFlags::WRITE) { 'w' } else { '-' },
        if flags.contains(SegmentFlags::EXECUTE) { 'x' } else { '-' }
    )
}
