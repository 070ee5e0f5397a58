//! # divert-core
//!
//! Platform-independent client side of the WinDivert packet diversion
//! protocol.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Descriptors** - the 80-byte [`Address`] record and its per-layer views
//! - **Sessions** - [`Handle`] lifecycle over an [`Engine`]
//! - **Batching** - batched receive/send, overlapped receive and packet
//!   boundary recovery
//! - **Configuration** - TOML session settings
//!
//! The engine itself is reached only through the [`Engine`] trait; the
//! `divert-platform` crate implements it on top of the native library.
//!
//! ## Example
//!
//! ```rust,no_run
//! use divert_core::{Address, Engine, Handle, Layer, OpenFlags};
//!
//! fn dump<E: Engine>(engine: E) -> divert_core::Result<()> {
//!     let handle = Handle::open(engine, "tcp", Layer::Network, 0, OpenFlags::SNIFF)?;
//!     let mut packets = vec![0u8; 65535];
//!     let mut addrs = vec![Address::default(); 16];
//!
//!     let received = handle.recv_batch(&mut packets, &mut addrs)?;
//!     for pair in handle.pairs(&packets[..received.bytes], &addrs[..received.descriptors]) {
//!         let (packet, addr) = pair?;
//!         println!("{} bytes, outbound={}", packet.len(), addr.outbound());
//!     }
//!     handle.close()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod batch;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod handle;
pub mod pin;

// Re-exports for convenience
pub use address::{
    Address, AddressFlags, EndpointData, LayerData, NetworkData, Overlay, ReflectData,
};
pub use batch::{
    BatchBuilder, Boundaries, BoundaryParser, IpHeaderParser, Pairs, PendingRecv, RecvBatch,
    Received,
};
pub use config::{QueueConfig, SessionConfig};
pub use consts::{ChecksumFlags, Event, Layer, OpenFlags, Param, ShutdownHow};
pub use engine::{Engine, Overlapped, RawHandle, RecvStatus};
pub use error::{Error, Op, Result};
pub use handle::{Handle, State};
pub use pin::ThreadPin;
