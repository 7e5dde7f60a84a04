//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::io::stdout;
use std::path::PathBuf;

use argh::FromArgs;
use core_relink::core_file::CoreFile;
use core_relink::reconstructor::Reconstructor;
use core_relink::writer::Writer;
use eyre::{eyre, Result, WrapErr};
use log::LevelFilter;
use stderrlog::LogLevelNum;

#[derive(FromArgs)]
/// Reads a kernel-generated ELF core dump and emits an augmented core dump
/// carrying synthesized dynamic-linker state (link_map chain, r_debug,
/// thread stacks) to standard output.
struct CoreRelinkArgs {
    #[argh(positional)]
    input: PathBuf,

    /// verbose output
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn init_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    stderrlog::new()
        .module(module_path!())
        .module("core_relink")
        .verbosity(LogLevelNum::from(level))
        .init()
        .unwrap();
}

fn main() -> Result<()> {
    let args: CoreRelinkArgs = argh::from_env();
    init_logger(args.verbose);

    let core = CoreFile::open(&args.input)
        .wrap_err_with(|| eyre!("Unable to read elf header"))?;

    let (ehdr, segments) = Reconstructor::new(&core)
        .run()
        .map_err(|e| {
            let diagnostic = diagnostic_for(&e);
            eyre::Report::new(e).wrap_err(diagnostic)
        })?;

    let writer = Writer::new(ehdr, core.ctx(), segments, stdout().lock());
    writer.write().wrap_err_with(|| eyre!("Unable to write output core"))?;

    Ok(())
}

/// Maps a reconstruction-stage failure to the single stderr diagnostic line
/// the pipeline stage is expected to produce.
fn diagnostic_for(err: &core_relink::error::CoreError) -> &'static str {
    use core_relink::error::CoreError;
    match err {
        CoreError::NotElf => "Unable to read elf header",
        CoreError::MalformedElf(msg) => {
            let msg = msg.to_lowercase();
            if msg.contains("link_map") {
                "Unable to read linkmap"
            } else if msg.contains("r_debug") || msg.contains("debug") {
                "Unable to read rdebug structure"
            } else if msg.contains("stack") {
                "Unable to read stacks"
            } else if msg.contains("dynamic") || msg.contains("phdr") || msg.contains("auxv") {
                "Unable to read dynamic section"
            } else if msg.contains("note") {
                "Unable to read core notes"
            } else {
                "Unable to reconstruct core"
            }
        }
        CoreError::UnsupportedArch(_) => "Unable to read stacks",
        CoreError::Io(_) => "Unable to read elf header",
        CoreError::OutputClosed => "Unable to write output core",
    }
}
