//! Batched transfer protocol
//!
//! Moves up to [`BATCH_MAX`] packets and their descriptors in one exchange.
//! The metadata length handed to the engine is always
//! `count * Address::SIZE`; the packet byte count is independent of it, and
//! individual packets are recovered with [`Boundaries`].

mod boundary;
mod builder;
mod overlapped;

pub use boundary::{Boundaries, BoundaryParser, IpHeaderParser, Pairs};
pub use builder::BatchBuilder;
pub use overlapped::{PendingRecv, RecvBatch};

use tracing::debug;

use crate::address::Address;
use crate::consts::BATCH_MAX;
use crate::engine::Engine;
use crate::error::{Error, Op, Result};
use crate::handle::Handle;

/// Outcome of a synchronous batched receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Packet bytes written
    pub bytes: usize,
    /// Descriptor slots filled
    pub descriptors: usize,
}

/// Metadata byte length for `count` descriptors
pub fn metadata_len(count: usize) -> Result<u32> {
    if count > BATCH_MAX {
        return Err(Error::BatchTooLarge {
            requested: count,
            max: BATCH_MAX,
        });
    }
    // BATCH_MAX * 80 fits comfortably in u32
    Ok((count * Address::SIZE) as u32)
}

/// Descriptor count encoded by a metadata length the engine wrote back
pub fn descriptors_filled(addr_len: u32, capacity: usize) -> Result<usize> {
    let bytes = addr_len as usize;
    if bytes % Address::SIZE != 0 {
        return Err(Error::malformed(
            0,
            format!("metadata length {bytes} is not a multiple of {}", Address::SIZE),
        ));
    }
    let count = bytes / Address::SIZE;
    if count > capacity {
        return Err(Error::malformed(
            0,
            format!("engine filled {count} descriptors, capacity {capacity}"),
        ));
    }
    Ok(count)
}

pub(crate) fn check_capacity(op: Op, packets: usize, addrs: usize) -> Result<()> {
    if packets == 0 {
        return Err(Error::EmptyBuffer { op });
    }
    if addrs == 0 {
        return Err(Error::InvalidArgument("descriptor array is empty".into()));
    }
    metadata_len(addrs).map(|_| ())
}

impl<E: Engine> BoundaryParser for Handle<E> {
    fn remaining_after_first(&self, packets: &[u8]) -> Result<usize> {
        if packets.is_empty() {
            return Err(Error::EmptyBuffer { op: Op::ParsePacket });
        }
        self.engine.parse_boundary(packets)
    }
}

impl<E: Engine> Handle<E> {
    /// Receive up to `addrs.len()` packets in one exchange.
    ///
    /// Packets land back to back in `packets`; descriptor `i` belongs to the
    /// `i`-th packet recovered by [`Handle::pairs`].
    pub fn recv_batch(&self, packets: &mut [u8], addrs: &mut [Address]) -> Result<Received> {
        check_capacity(Op::RecvEx, packets.len(), addrs.len())?;
        let mut addr_len = metadata_len(addrs.len())?;
        let capacity = addrs.len();

        let bytes = self
            .with_live(|raw| self.engine.recv_ex(raw, packets, addrs, &mut addr_len))
            .map_err(|e| self.map_recv_error(e))?;
        let descriptors = descriptors_filled(addr_len, capacity)?;

        debug!(bytes, descriptors, capacity, "Received batch");
        Ok(Received { bytes, descriptors })
    }

    /// Start an overlapped batched receive with freshly allocated buffers
    pub fn recv_batch_overlapped(
        &self,
        packet_capacity: usize,
        batch: usize,
    ) -> Result<PendingRecv<'_, E>> {
        PendingRecv::start(self, packet_capacity, batch)
    }

    /// Inject concatenated `packets`, one descriptor per packet.
    ///
    /// The packet count cannot be recovered here; the caller guarantees
    /// `addrs` has exactly one entry per packet.
    pub fn send_batch(&self, packets: &[u8], addrs: &[Address]) -> Result<usize> {
        check_capacity(Op::SendEx, packets.len(), addrs.len())?;
        for addr in addrs {
            self.check_layer(addr)?;
        }
        let sent = self.with_live(|raw| self.engine.send_ex(raw, packets, addrs))?;
        debug!(bytes = sent, descriptors = addrs.len(), "Sent batch");
        Ok(sent)
    }

    /// Send everything accumulated in `batch`
    pub fn send_builder(&self, batch: &BatchBuilder) -> Result<usize> {
        self.send_batch(batch.packets(), batch.descriptors())
    }

    /// Pair received packets with their descriptors using the engine parser
    pub fn pairs<'a>(&'a self, packets: &'a [u8], addrs: &'a [Address]) -> Pairs<'a, Self> {
        Pairs::new(self, packets, addrs)
    }
}
