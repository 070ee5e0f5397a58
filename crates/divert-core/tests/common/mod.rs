//! Shared test support: a mocked engine and an in-process engine that
//! hands sent packets back to the receive side.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::ffi::CStr;
use std::sync::Arc;

use divert_core::error::ERROR_NO_DATA;
use divert_core::{
    Address, BoundaryParser, Engine, Error, IpHeaderParser, Layer, Op, OpenFlags, Overlapped,
    Param, RawHandle, RecvStatus, Result, ShutdownHow,
};
use mockall::mock;
use parking_lot::{Condvar, Mutex};

mock! {
    pub Engine {}

    impl Engine for Engine {
        fn open(&self, filter: &CStr, layer: Layer, priority: i16, flags: OpenFlags)
            -> Result<RawHandle>;
        fn recv(&self, handle: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize>;
        fn recv_ex(
            &self,
            handle: RawHandle,
            packet: &mut [u8],
            addrs: &mut [Address],
            addr_len: &mut u32,
        ) -> Result<usize>;
        fn recv_ex_overlapped(
            &self,
            handle: RawHandle,
            packet: &mut [u8],
            addrs: &mut [Address],
            addr_len: &mut u32,
            overlapped: &mut Overlapped,
        ) -> Result<RecvStatus>;
        fn send(&self, handle: RawHandle, packet: &[u8], addr: &Address) -> Result<usize>;
        fn send_ex(&self, handle: RawHandle, packets: &[u8], addrs: &[Address]) -> Result<usize>;
        fn shutdown(&self, handle: RawHandle, how: ShutdownHow) -> Result<()>;
        fn close(&self, handle: RawHandle) -> Result<()>;
        fn set_param(&self, handle: RawHandle, param: Param, value: u64) -> Result<()>;
        fn get_param(&self, handle: RawHandle, param: Param) -> Result<u64>;
        fn parse_boundary(&self, packets: &[u8]) -> Result<usize>;
        fn overlapped_result(
            &self,
            handle: RawHandle,
            overlapped: &mut Overlapped,
            wait: bool,
        ) -> Result<Option<usize>>;
        fn cancel_overlapped(&self, handle: RawHandle, overlapped: &mut Overlapped) -> Result<()>;
    }
}

#[derive(Default)]
struct Queue {
    packets: VecDeque<(Vec<u8>, Address)>,
    recv_shutdown: bool,
    closed: u32,
    params: HashMap<u32, u64>,
}

/// Loopback engine; clones share one queue
#[derive(Clone, Default)]
pub struct Loopback {
    queue: Arc<Mutex<Queue>>,
    ready: Arc<Condvar>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of close calls seen
    pub fn closes(&self) -> u32 {
        self.queue.lock().closed
    }

    /// Packets waiting to be received
    pub fn queued(&self) -> usize {
        self.queue.lock().packets.len()
    }

    // Blocks until a packet is queued or receive is shut down.
    fn wait_for_packet(&self, op: Op) -> Result<parking_lot::MutexGuard<'_, Queue>> {
        let mut queue = self.queue.lock();
        while queue.packets.is_empty() && !queue.recv_shutdown {
            self.ready.wait(&mut queue);
        }
        if queue.packets.is_empty() {
            return Err(Error::engine(op, ERROR_NO_DATA));
        }
        Ok(queue)
    }

    fn fill(
        queue: &mut Queue,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
    ) -> usize {
        let mut written = 0;
        let mut filled = 0;
        while filled < addrs.len() {
            let fits = match queue.packets.front() {
                Some((bytes, _)) => written + bytes.len() <= packet.len(),
                None => false,
            };
            if !fits {
                break;
            }
            let Some((bytes, addr)) = queue.packets.pop_front() else {
                break;
            };
            packet[written..written + bytes.len()].copy_from_slice(&bytes);
            written += bytes.len();
            addrs[filled] = addr;
            filled += 1;
        }
        *addr_len = (filled * Address::SIZE) as u32;
        written
    }
}

impl Engine for Loopback {
    fn open(&self, _: &CStr, _: Layer, _: i16, _: OpenFlags) -> Result<RawHandle> {
        Ok(RawHandle(7))
    }

    fn recv(&self, _: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        let mut queue = self.wait_for_packet(Op::Recv)?;
        let Some((bytes, meta)) = queue.packets.pop_front() else {
            return Err(Error::engine(Op::Recv, ERROR_NO_DATA));
        };
        let n = bytes.len().min(packet.len());
        packet[..n].copy_from_slice(&bytes[..n]);
        *addr = meta;
        Ok(n)
    }

    fn recv_ex(
        &self,
        _: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
    ) -> Result<usize> {
        let mut queue = self.wait_for_packet(Op::RecvEx)?;
        Ok(Self::fill(&mut queue, packet, addrs, addr_len))
    }

    fn recv_ex_overlapped(
        &self,
        handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        addr_len: &mut u32,
        _: &mut Overlapped,
    ) -> Result<RecvStatus> {
        self.recv_ex(handle, packet, addrs, addr_len)
            .map(RecvStatus::Complete)
    }

    fn send(&self, _: RawHandle, packet: &[u8], addr: &Address) -> Result<usize> {
        self.queue.lock().packets.push_back((packet.to_vec(), *addr));
        self.ready.notify_all();
        Ok(packet.len())
    }

    fn send_ex(&self, _: RawHandle, packets: &[u8], addrs: &[Address]) -> Result<usize> {
        let mut split = Vec::with_capacity(addrs.len());
        let mut rest = packets;
        for addr in addrs {
            let remaining = IpHeaderParser.remaining_after_first(rest)?;
            let (first, tail) = rest.split_at(rest.len() - remaining);
            split.push((first.to_vec(), *addr));
            rest = tail;
        }
        self.queue.lock().packets.extend(split);
        self.ready.notify_all();
        Ok(packets.len() - rest.len())
    }

    fn shutdown(&self, _: RawHandle, how: ShutdownHow) -> Result<()> {
        if how.covers_recv() {
            self.queue.lock().recv_shutdown = true;
            self.ready.notify_all();
        }
        Ok(())
    }

    fn close(&self, _: RawHandle) -> Result<()> {
        self.queue.lock().closed += 1;
        Ok(())
    }

    fn set_param(&self, _: RawHandle, param: Param, value: u64) -> Result<()> {
        self.queue.lock().params.insert(param as u32, value);
        Ok(())
    }

    fn get_param(&self, _: RawHandle, param: Param) -> Result<u64> {
        let stored = self.queue.lock().params.get(&(param as u32)).copied();
        Ok(match param {
            Param::VersionMajor => 2,
            Param::VersionMinor => 2,
            _ => stored.unwrap_or(0),
        })
    }

    fn parse_boundary(&self, packets: &[u8]) -> Result<usize> {
        IpHeaderParser.remaining_after_first(packets)
    }

    fn overlapped_result(
        &self,
        _: RawHandle,
        _: &mut Overlapped,
        _: bool,
    ) -> Result<Option<usize>> {
        Err(Error::Unsupported { op: Op::Wait })
    }

    fn cancel_overlapped(&self, _: RawHandle, _: &mut Overlapped) -> Result<()> {
        Ok(())
    }
}

/// Minimal IPv4 packet with the given total length and a marker byte
pub fn ipv4(total_len: u16, marker: u8) -> Vec<u8> {
    let mut packet = vec![0u8; usize::from(total_len)];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&total_len.to_be_bytes());
    packet[8] = 64;
    packet[9] = 6;
    if packet.len() > 20 {
        packet[20] = marker;
    }
    packet
}

/// Minimal IPv6 packet with the given payload length
pub fn ipv6(payload_len: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 40 + usize::from(payload_len)];
    packet[0] = 0x60;
    packet[4..6].copy_from_slice(&payload_len.to_be_bytes());
    packet[6] = 17;
    packet
}

/// Outbound network descriptor with a distinguishing interface index
pub fn outbound(interface_index: u32) -> Address {
    let mut addr = Address::network(
        Layer::Network,
        divert_core::NetworkData {
            interface_index,
            subinterface_index: 0,
        },
    )
    .expect("network view on network layer");
    addr.set_outbound(true);
    addr
}
