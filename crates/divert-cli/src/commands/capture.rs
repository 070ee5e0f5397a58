//! Capture command - open a session and print what it receives

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use divert_core::{
    Address, Engine, Error, Handle, LayerData, OpenFlags, SessionConfig, ShutdownHow,
};
use divert_platform::{WinDivert, LIBRARY_NAME};
use tracing::{debug, info, warn};

use crate::args::LayerArg;

/// Capture statistics
#[derive(Debug, Default, PartialEq, Eq)]
struct CaptureStats {
    batches: u64,
    events: u64,
    bytes: u64,
}

/// Capture command arguments
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Session configuration file
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Filter expression
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Layer to open against
    #[arg(short = 'l', long, value_enum)]
    pub layer: Option<LayerArg>,

    /// Session priority
    #[arg(short = 'p', long, allow_negative_numbers = true)]
    pub priority: Option<i16>,

    /// Copy packets instead of diverting them
    #[arg(long)]
    pub sniff: bool,

    /// Descriptors per batched receive
    #[arg(short = 'b', long)]
    pub batch: Option<usize>,

    /// Stop after this many packets or events
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
}

/// Execute the capture command
pub fn execute(args: CaptureArgs) -> Result<()> {
    let config = build_config(&args)?;
    info!(
        filter = %config.filter,
        layer = %config.layer,
        batch = config.batch_size,
        "Starting capture"
    );

    let engine = WinDivert::load().with_context(|| format!("Failed to load {}", LIBRARY_NAME))?;
    let handle = Arc::new(
        Handle::open_with_config(engine, &config).context("Failed to open session")?,
    );

    let h = Arc::clone(&handle);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        if let Err(e) = h.shutdown(ShutdownHow::Both) {
            warn!(error = %e, "Shutdown failed");
        }
    })
    .context("Failed to set signal handler")?;

    let result = capture_loop(&handle, &config, args.count);
    handle.close().context("Failed to close session")?;
    let stats = result?;

    info!(
        batches = stats.batches,
        events = stats.events,
        bytes = stats.bytes,
        "Capture stopped"
    );
    Ok(())
}

fn build_config(args: &CaptureArgs) -> Result<SessionConfig> {
    // Priority: command line > config file > defaults
    let mut config = match args.config {
        Some(ref path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => SessionConfig::default(),
    };

    if let Some(ref filter) = args.filter {
        config.filter = filter.clone();
    }
    if let Some(layer) = args.layer {
        config.layer = layer.into();
    }
    if let Some(priority) = args.priority {
        config.priority = priority;
    }
    if let Some(batch) = args.batch {
        config.batch_size = batch;
    }
    if args.sniff {
        push_flag(&mut config, "sniff");
    }

    // Event layers only support sniffing, receive-only sessions
    if !config.layer.carries_packets() {
        debug!(layer = %config.layer, "Event layer, forcing sniff and recv-only");
        push_flag(&mut config, "sniff");
        push_flag(&mut config, "recv-only");
    }

    config.validate()?;
    Ok(config)
}

fn push_flag(config: &mut SessionConfig, name: &str) {
    let flag = OpenFlags::parse_name(name);
    let present = config
        .flags
        .iter()
        .any(|f| OpenFlags::parse_name(f) == flag);
    if !present {
        config.flags.push(name.to_string());
    }
}

fn capture_loop<E: Engine>(
    handle: &Handle<E>,
    config: &SessionConfig,
    limit: Option<u64>,
) -> Result<CaptureStats> {
    let mut stats = CaptureStats::default();
    let mut packets = vec![0u8; config.packet_buffer];
    let mut addrs = vec![Address::default(); config.batch_size];

    loop {
        let received = match handle.recv_batch(&mut packets, &mut addrs) {
            Ok(received) => received,
            Err(Error::EndOfSession { .. }) => {
                debug!("Receive queue drained");
                break;
            }
            Err(e) => return Err(e).context("Receive failed"),
        };
        stats.batches += 1;
        stats.bytes += received.bytes as u64;

        let addrs = &addrs[..received.descriptors];
        if handle.layer().carries_packets() {
            for pair in handle.pairs(&packets[..received.bytes], addrs) {
                let (packet, addr) = pair?;
                println!("{}", describe(addr, Some(packet.len())));
                stats.events += 1;
                if limit.is_some_and(|n| stats.events >= n) {
                    return Ok(stats);
                }
            }
        } else {
            for addr in addrs {
                println!("{}", describe(addr, None));
                stats.events += 1;
                if limit.is_some_and(|n| stats.events >= n) {
                    return Ok(stats);
                }
            }
        }
    }

    Ok(stats)
}

/// One output line for a received packet or event
fn describe(addr: &Address, packet_len: Option<usize>) -> String {
    let event = match addr.event() {
        Ok(event) => event.to_string(),
        Err(_) => "?".to_string(),
    };
    let direction = if addr.outbound() {
        "out".green()
    } else {
        "in".cyan()
    };

    let detail = match addr.layer_data() {
        Ok(LayerData::Network(data)) => format!(
            "if={}.{} len={}",
            data.interface_index,
            data.subinterface_index,
            packet_len.unwrap_or(0)
        ),
        Ok(LayerData::Flow(data)) | Ok(LayerData::Socket(data)) => format!(
            "{}:{} -> {}:{} proto={} pid={}",
            data.local_ip(),
            data.local_port,
            data.remote_ip(),
            data.remote_port,
            data.protocol,
            data.process_id
        ),
        Ok(LayerData::Reflect(data)) => format!(
            "pid={} layer={} priority={} flags={:#x}",
            data.process_id, data.layer, data.priority, data.flags
        ),
        Err(e) => format!("{}", e).red().to_string(),
    };

    format!(
        "{} {} {} {}",
        addr.timestamp().to_string().dimmed(),
        event.bold(),
        direction,
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use divert_core::{Event, Layer, NetworkData};

    fn args() -> CaptureArgs {
        CaptureArgs {
            config: None,
            filter: None,
            layer: None,
            priority: None,
            sniff: false,
            batch: None,
            count: None,
        }
    }

    #[test]
    fn test_build_config_overrides() {
        let config = build_config(&CaptureArgs {
            filter: Some("tcp.DstPort == 443".into()),
            priority: Some(7),
            batch: Some(4),
            sniff: true,
            ..args()
        })
        .unwrap();

        assert_eq!(config.filter, "tcp.DstPort == 443");
        assert_eq!(config.priority, 7);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.open_flags().unwrap(), OpenFlags::SNIFF);
    }

    #[test]
    fn test_event_layer_forces_flags() {
        let config = build_config(&CaptureArgs {
            layer: Some(LayerArg::Flow),
            sniff: true,
            ..args()
        })
        .unwrap();

        assert_eq!(config.layer, Layer::Flow);
        assert_eq!(config.flags.len(), 2);
        assert_eq!(
            config.open_flags().unwrap(),
            OpenFlags::SNIFF | OpenFlags::RECV_ONLY
        );
    }

    #[test]
    fn test_build_config_rejects_batch() {
        assert!(build_config(&CaptureArgs {
            batch: Some(0),
            ..args()
        })
        .is_err());
    }

    #[test]
    fn test_describe_network_packet() {
        colored::control::set_override(false);
        let mut addr = Address::network(
            Layer::Network,
            NetworkData {
                interface_index: 12,
                subinterface_index: 0,
            },
        )
        .unwrap();
        addr.set_outbound(true);

        let line = describe(&addr, Some(60));
        assert!(line.contains("out"));
        assert!(line.contains("if=12.0 len=60"));
    }

    #[test]
    fn test_describe_reflect_event() {
        colored::control::set_override(false);
        let addr = Address::new(Layer::Reflect, Event::ReflectOpen);
        let line = describe(&addr, None);
        assert!(line.contains("pid=0"));
    }
}
