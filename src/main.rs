//! The gflowc command line: compile a gflow source file to graph JSON.

use std::path::PathBuf;

use clap::Parser;
use gflowc::GflowcError;

/// Compile a gflow pipeline into the dataflow graph its executor consumes.
#[derive(clap::Parser)]
struct Cli {
    /// The gflow source file to compile.
    source: PathBuf,

    /// Write the graph JSON here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> miette::Result<()> {
    let command = Cli::parse();
    env_logger::init();

    log::info!("compiling pipeline: {}", command.source.display());
    let graph = gflowc::compile_file(&command.source)?;
    log::info!("emitting {} nodes", graph.len());

    let json = if command.pretty {
        graph.to_json_pretty()
    } else {
        graph.to_json()
    }
    .map_err(GflowcError::Serialize)?;

    match command.output {
        Some(file) => {
            std::fs::write(&file, json).map_err(|inner| GflowcError::FileWriting { file, inner })?;
        }
        None => println!("{json}"),
    }

    Ok(())
}
