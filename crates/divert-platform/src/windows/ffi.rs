//! Raw entry points of WinDivert.dll
//!
//! The library is loaded on first use and its exports are resolved exactly
//! once per process. The outcome, success or failure, is cached.

use std::ffi::c_void;

use once_cell::sync::OnceCell;
use tracing::{debug, info};
use winapi::shared::minwindef::{BOOL, FARPROC, HMODULE, UINT};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::libloaderapi::{GetProcAddress, LoadLibraryW};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::winnt::HANDLE;

use divert_core::{Address, Error, Op, Result};

/// Library file looked up through the normal DLL search order
pub const LIBRARY_NAME: &str = "WinDivert.dll";

pub type OpenFn = unsafe extern "C" fn(*const i8, u32, i16, u64) -> HANDLE;
pub type RecvFn = unsafe extern "C" fn(HANDLE, *mut c_void, UINT, *mut UINT, *mut Address) -> BOOL;
pub type RecvExFn = unsafe extern "C" fn(
    HANDLE,
    *mut c_void,
    UINT,
    *mut UINT,
    u64,
    *mut Address,
    *mut UINT,
    *mut OVERLAPPED,
) -> BOOL;
pub type SendFn =
    unsafe extern "C" fn(HANDLE, *const c_void, UINT, *mut UINT, *const Address) -> BOOL;
pub type SendExFn = unsafe extern "C" fn(
    HANDLE,
    *const c_void,
    UINT,
    *mut UINT,
    u64,
    *const Address,
    UINT,
    *mut OVERLAPPED,
) -> BOOL;
pub type ShutdownFn = unsafe extern "C" fn(HANDLE, u32) -> BOOL;
pub type CloseFn = unsafe extern "C" fn(HANDLE) -> BOOL;
pub type SetParamFn = unsafe extern "C" fn(HANDLE, u32, u64) -> BOOL;
pub type GetParamFn = unsafe extern "C" fn(HANDLE, u32, *mut u64) -> BOOL;
pub type ParsePacketFn = unsafe extern "C" fn(
    *const c_void,
    UINT,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut u8,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut UINT,
    *mut *mut c_void,
    *mut UINT,
) -> BOOL;

/// Resolved exports
pub struct EntryPoints {
    pub open: OpenFn,
    pub recv: RecvFn,
    pub recv_ex: RecvExFn,
    pub send: SendFn,
    pub send_ex: SendExFn,
    pub shutdown: ShutdownFn,
    pub close: CloseFn,
    pub set_param: SetParamFn,
    pub get_param: GetParamFn,
    /// Optional helper; boundary parsing falls back to header lengths
    pub parse_packet: Option<ParsePacketFn>,
}

// Plain function pointers into a library that is never unloaded
unsafe impl Send for EntryPoints {}
unsafe impl Sync for EntryPoints {}

static ENTRY_POINTS: OnceCell<std::result::Result<EntryPoints, u32>> = OnceCell::new();

/// Entry points of the process-wide library instance
pub fn entry_points() -> Result<&'static EntryPoints> {
    ENTRY_POINTS
        .get_or_init(resolve)
        .as_ref()
        .map_err(|&code| Error::engine(Op::Load, code))
}

fn resolve() -> std::result::Result<EntryPoints, u32> {
    let wide: Vec<u16> = LIBRARY_NAME.encode_utf16().chain(Some(0)).collect();

    // SAFETY: NUL-terminated UTF-16 string
    let module = unsafe { LoadLibraryW(wide.as_ptr()) };
    if module.is_null() {
        return Err(last_error());
    }
    debug!(library = LIBRARY_NAME, "Loaded engine library");

    // SAFETY: each export is transmuted to the signature WinDivert.dll
    // declares for it
    let entry_points = unsafe {
        EntryPoints {
            open: std::mem::transmute::<FARPROC, OpenFn>(symbol(module, b"WinDivertOpen\0")?),
            recv: std::mem::transmute::<FARPROC, RecvFn>(symbol(module, b"WinDivertRecv\0")?),
            recv_ex: std::mem::transmute::<FARPROC, RecvExFn>(symbol(
                module,
                b"WinDivertRecvEx\0",
            )?),
            send: std::mem::transmute::<FARPROC, SendFn>(symbol(module, b"WinDivertSend\0")?),
            send_ex: std::mem::transmute::<FARPROC, SendExFn>(symbol(
                module,
                b"WinDivertSendEx\0",
            )?),
            shutdown: std::mem::transmute::<FARPROC, ShutdownFn>(symbol(
                module,
                b"WinDivertShutdown\0",
            )?),
            close: std::mem::transmute::<FARPROC, CloseFn>(symbol(module, b"WinDivertClose\0")?),
            set_param: std::mem::transmute::<FARPROC, SetParamFn>(symbol(
                module,
                b"WinDivertSetParam\0",
            )?),
            get_param: std::mem::transmute::<FARPROC, GetParamFn>(symbol(
                module,
                b"WinDivertGetParam\0",
            )?),
            parse_packet: symbol(module, b"WinDivertHelperParsePacket\0")
                .ok()
                .map(|f| std::mem::transmute::<FARPROC, ParsePacketFn>(f)),
        }
    };

    info!(
        library = LIBRARY_NAME,
        parse_helper = entry_points.parse_packet.is_some(),
        "Resolved engine entry points"
    );
    Ok(entry_points)
}

// `name` must be NUL-terminated
unsafe fn symbol(module: HMODULE, name: &[u8]) -> std::result::Result<FARPROC, u32> {
    let proc = GetProcAddress(module, name.as_ptr().cast());
    if proc.is_null() {
        return Err(last_error());
    }
    Ok(proc)
}

/// OS error code of the last failed call on this thread
pub fn last_error() -> u32 {
    // SAFETY: reads thread-local state only
    unsafe { GetLastError() }
}
