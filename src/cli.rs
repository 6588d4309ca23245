//! Command-line surface: invoke the storage-backed components directly.
//!
//! Each subcommand takes one raw JSON action document and prints the tool
//! envelope's result text. Gateway-backed components (templates, workflows)
//! need a live host process and are not exposed here.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "hivekit", about = "Agent coordination primitives", version)]
pub struct Cli {
    /// Workspace root; defaults to the current directory.
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Task queue actions: add, claim, complete, fail, retry, list, clear, stats.
    Queue {
        /// JSON action document, e.g. '{"action":"add","task":"index docs"}'.
        args: String,
    },
    /// Message board actions: post, read, list, clear.
    Board { args: String },
    /// Knowledge store actions: set, get, delete, list, query, categories.
    Knowledge { args: String },
    /// Run a custom tool from config with the given JSON parameters.
    Tool {
        /// Tool name as declared in `[[tools.custom]]`.
        name: String,
        /// JSON parameter object.
        #[arg(default_value = "{}")]
        args: String,
    },
    /// List the custom tools declared in config.
    Tools,
}
