mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show webmodkit info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("webmodkit", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Metadata {
            path,
            assemblies,
            types,
        } => commands::metadata::run(path, assemblies, *types, &cli.global),
        Command::Webdata {
            path,
            extract,
            output,
        } => commands::webdata::run(path, extract.as_deref(), output.as_deref(), &cli.global),
        Command::Locate {
            module,
            metadata,
            data_start,
        } => commands::locate::run(module, metadata, *data_start, &cli.global),
        Command::Index {
            module,
            metadata,
            assemblies,
            r#type,
        } => commands::index::run(module, metadata, assemblies, r#type.as_deref(), &cli.global),
        Command::Roundtrip { module, output } => {
            commands::roundtrip::run(module, output.as_deref(), &cli.global)
        }
    }
}
