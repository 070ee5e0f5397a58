//! Command-line argument parsing

use clap::{Parser, ValueEnum};
use divert_core::Layer;

use crate::commands::Command;

/// divert - inspect WinDivert sessions
///
/// Opens sessions with the WinDivert engine, prints what they capture and
/// reads their parameters.
#[derive(Parser, Debug)]
#[command(name = "divert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for logs
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Log file path
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<String>,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}

/// Layer names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayerArg {
    /// Packets to and from the local host
    Network,
    /// Forwarded packets
    NetworkForward,
    /// Flow established/deleted events
    Flow,
    /// Socket operations
    Socket,
    /// Other engine sessions
    Reflect,
}

impl From<LayerArg> for Layer {
    fn from(arg: LayerArg) -> Self {
        match arg {
            LayerArg::Network => Layer::Network,
            LayerArg::NetworkForward => Layer::NetworkForward,
            LayerArg::Flow => Layer::Flow,
            LayerArg::Socket => Layer::Socket,
            LayerArg::Reflect => Layer::Reflect,
        }
    }
}
