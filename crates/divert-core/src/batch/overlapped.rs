//! Overlapped batched receive
//!
//! The engine writes into the buffers after the starting call returns, so
//! [`PendingRecv`] owns them together with the in/out metadata length and
//! the overlapped record until the operation finishes. Dropping it before
//! completion cancels the operation and waits for the engine to let go.

use tracing::{debug, warn};

use super::{
    check_capacity, descriptors_filled, metadata_len, Boundaries, BoundaryParser, Pairs,
};
use crate::address::Address;
use crate::engine::{Engine, Overlapped, RecvStatus};
use crate::error::{Error, Op, Result, ERROR_IO_INCOMPLETE};
use crate::handle::Handle;

/// Completed batched receive with owned buffers
#[derive(Debug, Clone)]
pub struct RecvBatch {
    packets: Vec<u8>,
    addrs: Vec<Address>,
}

impl RecvBatch {
    /// Concatenated packet bytes actually written
    pub fn packets(&self) -> &[u8] {
        &self.packets
    }

    /// Descriptors actually filled
    pub fn descriptors(&self) -> &[Address] {
        &self.addrs
    }

    /// Number of filled descriptors
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether nothing was received
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Packets paired with descriptors
    pub fn pairs<'a, P: BoundaryParser + ?Sized>(&'a self, parser: &'a P) -> Pairs<'a, P> {
        Pairs::new(parser, &self.packets, &self.addrs)
    }

    /// Take the buffers
    pub fn into_parts(self) -> (Vec<u8>, Vec<Address>) {
        (self.packets, self.addrs)
    }
}

/// Batched receive that may still be running
pub struct PendingRecv<'h, E: Engine> {
    handle: &'h Handle<E>,
    packets: Vec<u8>,
    addrs: Vec<Address>,
    addr_len: Box<u32>,
    overlapped: Box<Overlapped>,
    completed: Option<usize>,
    in_flight: bool,
}

impl<'h, E: Engine> PendingRecv<'h, E> {
    pub(crate) fn start(handle: &'h Handle<E>, packet_capacity: usize, batch: usize) -> Result<Self> {
        check_capacity(Op::RecvEx, packet_capacity, batch)?;
        let addr_len = Box::new(metadata_len(batch)?);

        // Once registered, close is refused until this value is dropped, so
        // the native handle outlives the operation.
        let mut pending = handle.with_live(|_| {
            handle.register_overlapped();
            Ok(Self {
                handle,
                packets: vec![0u8; packet_capacity],
                addrs: vec![Address::default(); batch],
                addr_len,
                overlapped: Box::default(),
                completed: None,
                in_flight: false,
            })
        })?;

        let status = handle
            .engine
            .recv_ex_overlapped(
                handle.raw(),
                &mut pending.packets,
                &mut pending.addrs,
                &mut pending.addr_len,
                &mut pending.overlapped,
            )
            .map_err(|e| handle.map_recv_error(e))?;

        match status {
            RecvStatus::Complete(bytes) => pending.completed = Some(bytes),
            RecvStatus::Pending => pending.in_flight = true,
        }
        debug!(batch, packet_capacity, in_flight = pending.in_flight, "Started overlapped receive");

        Ok(pending)
    }

    /// Check for completion without blocking
    pub fn poll(&mut self) -> Result<bool> {
        if self.completed.is_some() {
            return Ok(true);
        }
        self.fetch(false)
    }

    /// Block until the receive completes
    pub fn wait(mut self) -> Result<RecvBatch> {
        if self.completed.is_none() && !self.fetch(true)? {
            return Err(Error::engine(Op::Wait, ERROR_IO_INCOMPLETE));
        }
        self.finish()
    }

    fn fetch(&mut self, wait: bool) -> Result<bool> {
        let result = self
            .handle
            .engine
            .overlapped_result(self.handle.raw(), &mut self.overlapped, wait);

        match result {
            Ok(Some(bytes)) => {
                self.in_flight = false;
                self.completed = Some(bytes);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.in_flight = false;
                Err(self.handle.map_recv_error(e))
            }
        }
    }

    fn finish(&mut self) -> Result<RecvBatch> {
        let bytes = self.completed.unwrap_or(0).min(self.packets.len());
        let mut descriptors = descriptors_filled(*self.addr_len, self.addrs.len())?;

        // Completion may report only the byte count and leave the metadata
        // length at capacity; the packets written then decide.
        if descriptors == self.addrs.len() && self.handle.layer().carries_packets() {
            let found = Boundaries::new(self.handle, &self.packets[..bytes])
                .try_fold(0usize, |n, packet| packet.map(|_| n + 1))?;
            descriptors = descriptors.min(found);
        }

        let mut packets = std::mem::take(&mut self.packets);
        let mut addrs = std::mem::take(&mut self.addrs);
        packets.truncate(bytes);
        addrs.truncate(descriptors);

        debug!(bytes, descriptors, "Overlapped receive completed");
        Ok(RecvBatch { packets, addrs })
    }
}

impl<E: Engine> std::fmt::Debug for PendingRecv<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRecv")
            .field("handle", &self.handle.raw())
            .field("packet_capacity", &self.packets.len())
            .field("batch", &self.addrs.len())
            .field("completed", &self.completed)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl<E: Engine> Drop for PendingRecv<'_, E> {
    fn drop(&mut self) {
        let engine = &self.handle.engine;
        let raw = self.handle.raw();

        if self.in_flight {
            if let Err(e) = engine.cancel_overlapped(raw, &mut self.overlapped) {
                warn!(error = %e, "Failed to cancel overlapped receive");
            }
            // Buffers are freed below; the engine must be done with them
            if let Err(e) = engine.overlapped_result(raw, &mut self.overlapped, true) {
                debug!(error = %e, "Cancelled receive finished with error");
            }
        }
        engine.release_overlapped(&mut self.overlapped);
        self.handle.unregister_overlapped();
    }
}
