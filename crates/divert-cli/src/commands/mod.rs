//! CLI subcommands

pub mod capture;
pub mod param;
pub mod version;

use clap::Subcommand;

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a session and print what it receives
    Capture(capture::CaptureArgs),

    /// Read a session parameter
    Param(param::ParamArgs),

    /// Show the driver and tool versions
    Version,
}
