//! # divert-platform
//!
//! Native engine binding for `divert-core`.
//!
//! ## Supported Platforms
//!
//! - **Windows**: WinDivert.dll, loaded at runtime
//! - **Other targets**: [`WinDivert::load`] reports an unsupported operation
//!
//! ## Example
//!
//! ```rust,no_run
//! use divert_core::{Handle, Layer, OpenFlags};
//! use divert_platform::WinDivert;
//!
//! let engine = WinDivert::load()?;
//! let handle = Handle::open(engine, "outbound and tcp.DstPort == 443", Layer::Network, 0, OpenFlags::SNIFF)?;
//! println!("driver {:?}", handle.driver_version()?);
//! # Ok::<(), divert_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(windows)]
pub mod windows;

#[cfg(windows)]
pub use windows::{WinDivert, LIBRARY_NAME};

#[cfg(not(windows))]
mod unsupported;

#[cfg(not(windows))]
pub use unsupported::{WinDivert, LIBRARY_NAME};
