//! Stand-in for targets without WinDivert

use std::ffi::CStr;

use divert_core::{
    Address, Engine, Error, Layer, Op, OpenFlags, Overlapped, Param, RawHandle, RecvStatus,
    Result, ShutdownHow,
};
use tracing::warn;

/// Library file the Windows binding loads
pub const LIBRARY_NAME: &str = "WinDivert.dll";

/// WinDivert engine; never constructible on this target
#[derive(Debug, Clone, Copy)]
pub struct WinDivert {
    _private: (),
}

impl WinDivert {
    /// Always fails: WinDivert is only available on Windows
    pub fn load() -> Result<Self> {
        warn!("WinDivert is only available on Windows");
        Err(Error::Unsupported { op: Op::Load })
    }
}

fn unsupported<T>(op: Op) -> Result<T> {
    Err(Error::Unsupported { op })
}

impl Engine for WinDivert {
    fn open(&self, _: &CStr, _: Layer, _: i16, _: OpenFlags) -> Result<RawHandle> {
        unsupported(Op::Open)
    }

    fn recv(&self, _: RawHandle, _: &mut [u8], _: &mut Address) -> Result<usize> {
        unsupported(Op::Recv)
    }

    fn recv_ex(
        &self,
        _: RawHandle,
        _: &mut [u8],
        _: &mut [Address],
        _: &mut u32,
    ) -> Result<usize> {
        unsupported(Op::RecvEx)
    }

    fn recv_ex_overlapped(
        &self,
        _: RawHandle,
        _: &mut [u8],
        _: &mut [Address],
        _: &mut u32,
        _: &mut Overlapped,
    ) -> Result<RecvStatus> {
        unsupported(Op::RecvEx)
    }

    fn send(&self, _: RawHandle, _: &[u8], _: &Address) -> Result<usize> {
        unsupported(Op::Send)
    }

    fn send_ex(&self, _: RawHandle, _: &[u8], _: &[Address]) -> Result<usize> {
        unsupported(Op::SendEx)
    }

    fn shutdown(&self, _: RawHandle, _: ShutdownHow) -> Result<()> {
        unsupported(Op::Shutdown)
    }

    fn close(&self, _: RawHandle) -> Result<()> {
        unsupported(Op::Close)
    }

    fn set_param(&self, _: RawHandle, _: Param, _: u64) -> Result<()> {
        unsupported(Op::SetParam)
    }

    fn get_param(&self, _: RawHandle, _: Param) -> Result<u64> {
        unsupported(Op::GetParam)
    }

    fn parse_boundary(&self, _: &[u8]) -> Result<usize> {
        unsupported(Op::ParsePacket)
    }

    fn overlapped_result(&self, _: RawHandle, _: &mut Overlapped, _: bool) -> Result<Option<usize>> {
        unsupported(Op::Wait)
    }

    fn cancel_overlapped(&self, _: RawHandle, _: &mut Overlapped) -> Result<()> {
        unsupported(Op::Cancel)
    }
}
