//! Parameter command
//!
//! Parameters belong to a single session and are gone once it closes, so
//! this only reads them. Queue tuning for a capture goes through the
//! `[queue]` table of its config file.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use divert_core::{Handle, Layer, OpenFlags, Param};
use divert_platform::{WinDivert, LIBRARY_NAME};

/// Arguments for the param command
#[derive(Args, Debug)]
pub struct ParamArgs {
    /// Parameter name (queue-length, queue-time, queue-size, version-major, version-minor)
    pub name: String,
}

fn lookup(name: &str) -> Result<Param> {
    Param::from_name(name).ok_or_else(|| anyhow!("Unknown parameter: {}", name))
}

/// Execute the param command
pub fn execute(args: ParamArgs) -> Result<()> {
    // Resolve the name before touching the engine
    let param = lookup(&args.name)?;

    let engine = WinDivert::load().with_context(|| format!("Failed to load {}", LIBRARY_NAME))?;
    let value = Handle::with_open(
        engine,
        "false",
        Layer::Network,
        0,
        OpenFlags::SNIFF | OpenFlags::RECV_ONLY,
        |handle| handle.get_param(param),
    )
    .with_context(|| format!("Failed to read {}", param))?;

    println!("{} = {}", param, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("queue-time").unwrap(), Param::QueueTime);
        assert!(lookup("queue-depth").is_err());
    }
}
