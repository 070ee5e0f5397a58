//! Windows binding to WinDivert.dll
//!
//! The library is loaded at runtime instead of linked, so a missing driver
//! surfaces as an error from [`WinDivert::load`] rather than a failed start.

mod engine;
mod ffi;

pub use engine::WinDivert;
pub use ffi::LIBRARY_NAME;
