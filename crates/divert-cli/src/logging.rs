//! Logging initialization
//!
//! Logs go to stderr so captured packets on stdout stay clean. With
//! `--log-file` every format is mirrored into the file, without colors.

use std::fs::File;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};

/// Default level picked by `-q` and the `-v` count
fn level(args: &Args) -> Level {
    if args.quiet {
        return Level::ERROR;
    }
    match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn open_log_file(args: &Args) -> Result<Option<File>> {
    args.log_file
        .as_deref()
        .map(|path| {
            File::create(path).with_context(|| format!("Failed to create log file: {}", path))
        })
        .transpose()
}

/// Initialize logging based on CLI arguments
pub fn init(args: &Args) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level(args).into())
        .from_env_lossy();
    let file = open_log_file(args)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match args.log_format {
        LogFormat::Text => {
            let stderr = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(args.verbose >= 2)
                .with_thread_ids(args.verbose >= 3)
                .with_file(args.verbose >= 3)
                .with_line_number(args.verbose >= 3);
            let file = file.map(|f| fmt::layer().with_ansi(false).with_writer(f));
            registry.with(stderr).with(file).init();
        }
        LogFormat::Json => {
            let stderr = fmt::layer().json().with_writer(std::io::stderr);
            let file = file.map(|f| fmt::layer().json().with_writer(f));
            registry.with(stderr).with(file).init();
        }
        LogFormat::Compact => {
            let stderr = fmt::layer().compact().with_writer(std::io::stderr);
            let file = file.map(|f| fmt::layer().compact().with_ansi(false).with_writer(f));
            registry.with(stderr).with(file).init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(level(&Args::parse_from(["divert", "version"])), Level::INFO);
        assert_eq!(level(&Args::parse_from(["divert", "-vv", "version"])), Level::TRACE);
        assert_eq!(level(&Args::parse_from(["divert", "-q", "-v", "version"])), Level::ERROR);
    }

    #[test]
    fn test_log_file_for_compact_format() {
        let path = std::env::temp_dir().join(format!("divert-log-{}.log", std::process::id()));
        let args = Args::parse_from([
            "divert",
            "--log-format",
            "compact",
            "--log-file",
            path.to_str().unwrap(),
            "version",
        ]);

        assert!(open_log_file(&args).unwrap().is_some());
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_log_file_unwritable() {
        let args = Args::parse_from([
            "divert",
            "--log-file",
            "/nonexistent-dir/divert.log",
            "version",
        ]);
        assert!(open_log_file(&args).is_err());
    }
}
