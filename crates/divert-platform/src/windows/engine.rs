//! [`Engine`] implementation over WinDivert.dll

use std::ffi::{c_void, CStr};
use std::ptr;

use tracing::{debug, trace};
use winapi::shared::minwindef::{FALSE, TRUE, UINT};
use winapi::shared::winerror::{ERROR_IO_INCOMPLETE, ERROR_IO_PENDING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{CancelIoEx, GetOverlappedResult};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::CreateEventW;
use winapi::um::winnt::HANDLE;

use divert_core::{
    Address, BoundaryParser, Engine, Error, IpHeaderParser, Layer, Op, OpenFlags, Overlapped,
    Param, RawHandle, RecvStatus, Result, ShutdownHow,
};

use super::ffi::{self, EntryPoints};

const _: () = assert!(std::mem::size_of::<Overlapped>() == std::mem::size_of::<OVERLAPPED>());

/// Native WinDivert engine
#[derive(Clone, Copy)]
pub struct WinDivert {
    api: &'static EntryPoints,
}

impl WinDivert {
    /// Load WinDivert.dll and resolve its entry points.
    ///
    /// Resolution happens once per process; later calls return the cached
    /// outcome.
    pub fn load() -> Result<Self> {
        Ok(Self {
            api: ffi::entry_points()?,
        })
    }
}

impl std::fmt::Debug for WinDivert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinDivert")
            .field("library", &ffi::LIBRARY_NAME)
            .finish()
    }
}

fn handle(raw: RawHandle) -> HANDLE {
    raw.0 as HANDLE
}

fn len_u32(op: Op, len: usize) -> Result<UINT> {
    UINT::try_from(len).map_err(|_| Error::InvalidArgument(format!("{op}: buffer of {len} bytes")))
}

fn check(op: Op, ok: i32) -> Result<()> {
    if ok == FALSE {
        return Err(Error::engine(op, ffi::last_error()));
    }
    Ok(())
}

fn as_native(overlapped: &mut Overlapped) -> *mut OVERLAPPED {
    (overlapped as *mut Overlapped).cast()
}

impl Engine for WinDivert {
    fn open(
        &self,
        filter: &CStr,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<RawHandle> {
        // SAFETY: filter is NUL-terminated and outlives the call
        let h = unsafe { (self.api.open)(filter.as_ptr(), layer as u32, priority, flags.bits()) };
        if h == INVALID_HANDLE_VALUE {
            return Err(Error::engine(Op::Open, ffi::last_error()));
        }
        Ok(RawHandle(h as isize))
    }

    fn recv(&self, raw: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        let mut read: UINT = 0;
        // SAFETY: buffers are valid for the lengths given
        let ok = unsafe {
            (self.api.recv)(
                handle(raw),
                packet.as_mut_ptr().cast::<c_void>(),
                len_u32(Op::Recv, packet.len())?,
                &mut read,
                addr,
            )
        };
        check(Op::Recv, ok)?;
        Ok(read as usize)
    }

    fn recv_ex(
        &self,
        raw: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
    ) -> Result<usize> {
        let mut read: UINT = 0;
        // SAFETY: buffers are valid for the lengths given; the call is
        // synchronous so nothing is retained after it returns
        let ok = unsafe {
            (self.api.recv_ex)(
                handle(raw),
                packet.as_mut_ptr().cast::<c_void>(),
                len_u32(Op::RecvEx, packet.len())?,
                &mut read,
                0,
                addrs.as_mut_ptr(),
                addr_len,
                ptr::null_mut(),
            )
        };
        check(Op::RecvEx, ok)?;
        Ok(read as usize)
    }

    fn recv_ex_overlapped(
        &self,
        raw: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
        overlapped: &mut Overlapped,
    ) -> Result<RecvStatus> {
        if overlapped.event() == 0 {
            // SAFETY: manual-reset, initially unsignalled, unnamed event
            let event = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
            if event.is_null() {
                return Err(Error::engine(Op::RecvEx, ffi::last_error()));
            }
            overlapped.set_event(event as isize);
        }

        let mut read: UINT = 0;
        // SAFETY: the caller keeps every buffer and the record in place
        // until the operation completes or is cancelled and drained
        let ok = unsafe {
            (self.api.recv_ex)(
                handle(raw),
                packet.as_mut_ptr().cast::<c_void>(),
                len_u32(Op::RecvEx, packet.len())?,
                &mut read,
                0,
                addrs.as_mut_ptr(),
                addr_len,
                as_native(overlapped),
            )
        };

        if ok != FALSE {
            return Ok(RecvStatus::Complete(read as usize));
        }
        match ffi::last_error() {
            ERROR_IO_PENDING => {
                trace!(handle = raw.0, "Receive pending");
                Ok(RecvStatus::Pending)
            }
            code => Err(Error::engine(Op::RecvEx, code)),
        }
    }

    fn send(&self, raw: RawHandle, packet: &[u8], addr: &Address) -> Result<usize> {
        let mut written: UINT = 0;
        // SAFETY: buffers are valid for the lengths given
        let ok = unsafe {
            (self.api.send)(
                handle(raw),
                packet.as_ptr().cast::<c_void>(),
                len_u32(Op::Send, packet.len())?,
                &mut written,
                addr,
            )
        };
        check(Op::Send, ok)?;
        Ok(written as usize)
    }

    fn send_ex(&self, raw: RawHandle, packets: &[u8], addrs: &[Address]) -> Result<usize> {
        let addr_len = len_u32(Op::SendEx, std::mem::size_of_val(addrs))?;
        let mut written: UINT = 0;
        // SAFETY: buffers are valid for the lengths given; synchronous call
        let ok = unsafe {
            (self.api.send_ex)(
                handle(raw),
                packets.as_ptr().cast::<c_void>(),
                len_u32(Op::SendEx, packets.len())?,
                &mut written,
                0,
                addrs.as_ptr(),
                addr_len,
                ptr::null_mut(),
            )
        };
        check(Op::SendEx, ok)?;
        Ok(written as usize)
    }

    fn shutdown(&self, raw: RawHandle, how: ShutdownHow) -> Result<()> {
        // SAFETY: plain value arguments
        let ok = unsafe { (self.api.shutdown)(handle(raw), how as u32) };
        check(Op::Shutdown, ok)
    }

    fn close(&self, raw: RawHandle) -> Result<()> {
        // SAFETY: plain value argument
        let ok = unsafe { (self.api.close)(handle(raw)) };
        check(Op::Close, ok)
    }

    fn set_param(&self, raw: RawHandle, param: Param, value: u64) -> Result<()> {
        // SAFETY: plain value arguments
        let ok = unsafe { (self.api.set_param)(handle(raw), param as u32, value) };
        check(Op::SetParam, ok)
    }

    fn get_param(&self, raw: RawHandle, param: Param) -> Result<u64> {
        let mut value = 0u64;
        // SAFETY: value outlives the call
        let ok = unsafe { (self.api.get_param)(handle(raw), param as u32, &mut value) };
        check(Op::GetParam, ok)?;
        Ok(value)
    }

    fn parse_boundary(&self, packets: &[u8]) -> Result<usize> {
        let Some(parse) = self.api.parse_packet else {
            return IpHeaderParser.remaining_after_first(packets);
        };

        let mut next: *mut c_void = ptr::null_mut();
        let mut next_len: UINT = 0;
        // SAFETY: only the next-packet outputs are requested; the rest are
        // null, which the helper accepts
        let ok = unsafe {
            parse(
                packets.as_ptr().cast::<c_void>(),
                len_u32(Op::ParsePacket, packets.len())?,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                &mut next,
                &mut next_len,
            )
        };
        if ok == FALSE {
            return Err(Error::malformed(0, "engine could not parse packet"));
        }
        Ok(if next.is_null() { 0 } else { next_len as usize })
    }

    fn overlapped_result(
        &self,
        raw: RawHandle,
        overlapped: &mut Overlapped,
        wait: bool,
    ) -> Result<Option<usize>> {
        let mut transferred = 0u32;
        // SAFETY: the record was passed to an operation on this handle
        let ok = unsafe {
            GetOverlappedResult(
                handle(raw),
                as_native(overlapped),
                &mut transferred,
                if wait { TRUE } else { FALSE },
            )
        };
        if ok != FALSE {
            return Ok(Some(transferred as usize));
        }
        match ffi::last_error() {
            ERROR_IO_INCOMPLETE if !wait => Ok(None),
            code => Err(Error::engine(Op::Wait, code)),
        }
    }

    fn cancel_overlapped(&self, raw: RawHandle, overlapped: &mut Overlapped) -> Result<()> {
        // SAFETY: the record was passed to an operation on this handle
        let ok = unsafe { CancelIoEx(handle(raw), as_native(overlapped)) };
        check(Op::Cancel, ok)
    }

    fn release_overlapped(&self, overlapped: &mut Overlapped) {
        let event = overlapped.event();
        if event != 0 {
            // SAFETY: the event was created by recv_ex_overlapped and the
            // operation using it has finished
            unsafe { CloseHandle(event as HANDLE) };
            debug!("Released completion event");
        }
        overlapped.set_event(0);
    }
}
