use clap::{Args, Subcommand};
use std::path::PathBuf;

use lspmux_frame::DEFAULT_MAX_BODY;
use lspmux_pool::{DEFAULT_READ_BUDGET, DEFAULT_READ_CHUNK};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept peers and print every received frame.
    Listen(ListenArgs),
    /// Send a single frame.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind. A stale socket at this path is replaced.
    pub path: PathBuf,
    /// Send each body back to its peer as a framed reply.
    #[arg(long)]
    pub echo: bool,
    /// Check that each body is valid JSON and report the ones that are not.
    #[arg(long)]
    pub json: bool,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Bytes requested per socket read.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_READ_CHUNK)]
    pub chunk_size: usize,
    /// Socket reads per peer before other peers get a turn.
    #[arg(long, value_name = "READS", default_value_t = DEFAULT_READ_BUDGET)]
    pub read_budget: usize,
    /// Largest accepted Content-Length.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_BODY)]
    pub max_body: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// JSON body.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string body.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read body from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Extra header, repeatable (e.g. --header Type:documentSymbol).
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
    /// Wait for one reply frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `NAME:VALUE`, splitting on the first colon.
fn parse_header(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {input:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}
