//! Send-side batch assembly

use crate::address::Address;
use crate::consts::BATCH_MAX;
use crate::error::{Error, Op, Result};

/// Concatenated packets and their descriptors, kept in lockstep
#[derive(Debug, Clone, Default)]
pub struct BatchBuilder {
    packets: Vec<u8>,
    addrs: Vec<Address>,
}

impl BatchBuilder {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty batch with room for `count` packets of about `packet_len` bytes
    pub fn with_capacity(count: usize, packet_len: usize) -> Self {
        Self {
            packets: Vec::with_capacity(count * packet_len),
            addrs: Vec::with_capacity(count),
        }
    }

    /// Append one packet and its descriptor
    pub fn push(&mut self, packet: &[u8], addr: Address) -> Result<()> {
        if packet.is_empty() {
            return Err(Error::EmptyBuffer { op: Op::SendEx });
        }
        if self.addrs.len() == BATCH_MAX {
            return Err(Error::BatchTooLarge {
                requested: BATCH_MAX + 1,
                max: BATCH_MAX,
            });
        }
        self.packets.extend_from_slice(packet);
        self.addrs.push(addr);
        Ok(())
    }

    /// Concatenated packet bytes
    pub fn packets(&self) -> &[u8] {
        &self.packets
    }

    /// Descriptors in packet order
    pub fn descriptors(&self) -> &[Address] {
        &self.addrs
    }

    /// Number of packets
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether no packet was added
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Whether another packet would exceed the batch limit
    pub fn is_full(&self) -> bool {
        self.addrs.len() == BATCH_MAX
    }

    /// Drop all packets, keeping the allocations
    pub fn clear(&mut self) {
        self.packets.clear();
        self.addrs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_lockstep() {
        let mut batch = BatchBuilder::new();
        batch.push(&[1, 2, 3], Address::default()).unwrap();
        batch.push(&[4, 5], Address::default()).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.packets(), &[1, 2, 3, 4, 5]);
        assert_eq!(batch.descriptors().len(), 2);
    }

    #[test]
    fn test_push_rejects_empty_packet() {
        let mut batch = BatchBuilder::new();
        assert!(matches!(
            batch.push(&[], Address::default()),
            Err(Error::EmptyBuffer { op: Op::SendEx })
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_push_limit() {
        let mut batch = BatchBuilder::with_capacity(BATCH_MAX, 1);
        for _ in 0..BATCH_MAX {
            batch.push(&[0], Address::default()).unwrap();
        }
        assert!(batch.is_full());
        assert!(matches!(
            batch.push(&[0], Address::default()),
            Err(Error::BatchTooLarge { .. })
        ));

        batch.clear();
        assert!(batch.is_empty());
    }
}
