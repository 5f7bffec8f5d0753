//! Print the contents of a NetBeans profiler snapshot.

// crate-specific exceptions:
#![allow(clippy::exit, clippy::print_stdout)]

use anyhow::Context as _;
use nps_viewer::RenderOptions;

/// NetBeans profiler snapshot viewer.
///
/// Prints the threads and call trees of a .nps file.
#[derive(argh::FromArgs)]
struct Arguments {
    /// what .nps file to open, e.g. `my/snapshot.nps`.
    #[argh(positional)]
    file: String,

    /// only print call tree nodes up to this depth.
    #[argh(option)]
    depth: Option<usize>,

    /// only print the thread with this name.
    #[argh(option)]
    thread: Option<String>,

    /// log decoding details.
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn run(opt: Arguments) -> anyhow::Result<()> {
    let path = std::path::PathBuf::from(opt.file);
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let container = nps::Container::decode(&bytes)
        .with_context(|| format!("Failed to decode {}", path.display()))?;

    let options = RenderOptions {
        max_depth: opt.depth,
        thread: opt.thread,
    };
    let mut text = String::new();
    nps_viewer::render(&mut text, &container, &options)?;
    print!("{text}");
    Ok(())
}

fn main() {
    let opt: Arguments = argh::from_env();

    simple_logger::SimpleLogger::new()
        .with_level(if opt.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init()
        .ok();

    if let Err(err) = run(opt) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
