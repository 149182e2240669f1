use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// webmodkit - Unity WebGL IL2CPP build inspection
#[derive(Debug, Parser)]
#[command(name = "webmodkit", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize global metadata: revision, counts, and the retained images.
    Metadata {
        /// Path to global-metadata.dat or a UnityWebData bundle, `-` for standard input.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Assemblies to retain (repeatable).
        #[arg(short, long = "assembly", value_name = "NAME", default_value = "Assembly-CSharp.dll")]
        assemblies: Vec<String>,

        /// List the retained types.
        #[arg(long)]
        types: bool,
    },

    /// List the nodes of a UnityWebData bundle.
    Webdata {
        /// Path to the bundle (usually Build/<game>.data), `-` for standard input.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Write the contents of the named node to --output.
        #[arg(long, value_name = "NODE", requires = "output")]
        extract: Option<String>,

        /// Output path for --extract.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Locate the code registration structure in a module's static data.
    Locate {
        /// Path to the WebAssembly module.
        #[arg(value_name = "MODULE")]
        module: PathBuf,

        /// Path to global-metadata.dat or a UnityWebData bundle.
        #[arg(short, long, value_name = "FILE")]
        metadata: PathBuf,

        /// First address of the searched data region.
        #[arg(long, default_value_t = 1024)]
        data_start: usize,
    },

    /// Print the script index: the table slot of every method of the given assemblies.
    Index {
        /// Path to the WebAssembly module.
        #[arg(value_name = "MODULE")]
        module: PathBuf,

        /// Path to global-metadata.dat or a UnityWebData bundle.
        #[arg(short, long, value_name = "FILE")]
        metadata: PathBuf,

        /// Assemblies to index (repeatable).
        #[arg(short, long = "assembly", value_name = "NAME", default_value = "Assembly-CSharp.dll")]
        assemblies: Vec<String>,

        /// Show only types whose full name contains this string.
        #[arg(long, value_name = "NAME")]
        r#type: Option<String>,
    },

    /// Decode and re-encode a module, verifying that nothing changes.
    Roundtrip {
        /// Path to the WebAssembly module.
        #[arg(value_name = "MODULE")]
        module: PathBuf,

        /// Also write the re-encoded module here.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}
