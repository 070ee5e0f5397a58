//! Engine entry points
//!
//! The diversion engine lives outside this crate. [`Engine`] is the seam
//! through which every call reaches it; platform crates implement it on top
//! of the native library, tests implement it with doubles.

use std::ffi::CStr;

use crate::address::Address;
use crate::consts::{Layer, OpenFlags, Param, ShutdownHow};
use crate::error::Result;

/// Opaque engine-assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

/// Completion record for an overlapped exchange.
///
/// Laid out like the platform's overlapped I/O record so engines can pass
/// it straight through. The record must stay at a fixed address until the
/// operation completes or is cancelled.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Overlapped {
    internal: usize,
    internal_high: usize,
    offset: u32,
    offset_high: u32,
    event: isize,
}

impl Overlapped {
    /// Completion event associated with this record (0 if none)
    pub fn event(&self) -> isize {
        self.event
    }

    /// Associate a completion event
    pub fn set_event(&mut self, event: isize) {
        self.event = event;
    }
}

/// Outcome of starting a batched receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// Finished synchronously; packet bytes written
    Complete(usize),
    /// Still running; completion is reported through the overlapped record
    Pending,
}

/// Entry points of the packet diversion engine.
///
/// Every method maps to one engine call. Failures are reported as
/// [`Error::Engine`](crate::Error::Engine) carrying the OS error code, or
/// [`Error::Unsupported`](crate::Error::Unsupported) when the capability is
/// not wired up. Implementations do no argument validation of their own;
/// [`Handle`](crate::Handle) does that before calling in.
pub trait Engine: Send + Sync {
    /// Open a session
    fn open(&self, filter: &CStr, layer: Layer, priority: i16, flags: OpenFlags)
        -> Result<RawHandle>;

    /// Receive one packet into `packet`, filling `addr`; returns bytes written
    fn recv(&self, handle: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize>;

    /// Batched receive.
    ///
    /// `addr_len` is in/out: the byte length of `addrs` on entry, the bytes
    /// of descriptors actually filled on return. Returns packet bytes written.
    fn recv_ex(
        &self,
        handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
    ) -> Result<usize>;

    /// Batched receive completing through `overlapped`.
    ///
    /// Same contract as [`recv_ex`](Self::recv_ex), except that the call
    /// may return [`RecvStatus::Pending`] while the engine keeps writing
    /// into every buffer passed here.
    fn recv_ex_overlapped(
        &self,
        handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
        overlapped: &mut Overlapped,
    ) -> Result<RecvStatus>;

    /// Inject one packet; returns bytes accepted
    fn send(&self, handle: RawHandle, packet: &[u8], addr: &Address) -> Result<usize>;

    /// Inject concatenated packets, one descriptor each; returns bytes accepted
    fn send_ex(&self, handle: RawHandle, packets: &[u8], addrs: &[Address]) -> Result<usize>;

    /// Disable receive, send or both
    fn shutdown(&self, handle: RawHandle, how: ShutdownHow) -> Result<()>;

    /// Release the session
    fn close(&self, handle: RawHandle) -> Result<()>;

    /// Write a session parameter
    fn set_param(&self, handle: RawHandle, param: Param, value: u64) -> Result<()>;

    /// Read a session parameter
    fn get_param(&self, handle: RawHandle, param: Param) -> Result<u64>;

    /// Bytes remaining in `packets` after its first packet
    fn parse_boundary(&self, packets: &[u8]) -> Result<usize>;

    /// Completion of an overlapped receive: `Some(bytes)` once done,
    /// `None` while still pending and `wait` is false
    fn overlapped_result(
        &self,
        handle: RawHandle,
        overlapped: &mut Overlapped,
        wait: bool,
    ) -> Result<Option<usize>>;

    /// Request cancellation of an overlapped operation
    fn cancel_overlapped(&self, handle: RawHandle, overlapped: &mut Overlapped) -> Result<()>;

    /// Release resources attached to an overlapped record (its event)
    fn release_overlapped(&self, overlapped: &mut Overlapped) {
        overlapped.set_event(0);
    }
}
