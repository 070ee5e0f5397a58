//! Version command

use anyhow::{Context, Result};
use colored::Colorize;
use divert_core::{Handle, Layer, OpenFlags};
use divert_platform::{WinDivert, LIBRARY_NAME};

/// Print tool and driver versions
pub fn execute() -> Result<()> {
    println!("{} {}", "divert".bold(), env!("CARGO_PKG_VERSION"));

    let engine = WinDivert::load().with_context(|| format!("Failed to load {}", LIBRARY_NAME))?;
    let (major, minor) = Handle::with_open(
        engine,
        "false",
        Layer::Network,
        0,
        OpenFlags::SNIFF | OpenFlags::RECV_ONLY,
        |handle| handle.driver_version(),
    )
    .context("Failed to query driver version")?;

    println!("{} {}.{}", "driver".bold(), major, minor);
    Ok(())
}
