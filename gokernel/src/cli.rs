//! Command-line surface (§10.3), in the teacher's `cargo-cellbook` derive
//! style: a top-level `Parser` with one optional subcommand, everything
//! else expressed as flags on the root command since a kernel has exactly
//! one normal mode of operation (serve a connection file).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gokernel")]
#[command(about = "A Jupyter kernel for the Go programming language")]
pub struct Cli {
    /// Path to the Jupyter-provided connection file. Required unless a
    /// subcommand is given.
    #[arg(short = 'f', long = "connection-file")]
    pub connection_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write this kernel's kernelspec into the platform kernels directory.
    Install,
}
