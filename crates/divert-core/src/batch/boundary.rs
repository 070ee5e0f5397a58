//! Packet boundary recovery
//!
//! A batch buffer holds packets back to back with no length prefixes. The
//! only way to find where the first packet ends is to ask a parser how many
//! bytes remain after it; repeating that on the suffix walks the batch.

use crate::address::Address;
use crate::error::{Error, Op, Result};

/// Locates the end of the first packet in a buffer
pub trait BoundaryParser {
    /// Number of bytes in `packets` following its first packet
    fn remaining_after_first(&self, packets: &[u8]) -> Result<usize>;
}

impl<P: BoundaryParser + ?Sized> BoundaryParser for &P {
    fn remaining_after_first(&self, packets: &[u8]) -> Result<usize> {
        (**self).remaining_after_first(packets)
    }
}

/// Boundary parser reading IPv4 total length / IPv6 payload length
#[derive(Debug, Clone, Copy, Default)]
pub struct IpHeaderParser;

impl BoundaryParser for IpHeaderParser {
    fn remaining_after_first(&self, packets: &[u8]) -> Result<usize> {
        let first = *packets
            .first()
            .ok_or(Error::EmptyBuffer { op: Op::ParsePacket })?;

        let len = match first >> 4 {
            4 => {
                if packets.len() < 20 {
                    return Err(Error::malformed(0, "truncated IPv4 header"));
                }
                let header_len = usize::from(first & 0x0F) * 4;
                let total_len = usize::from(u16::from_be_bytes([packets[2], packets[3]]));
                if header_len < 20 || total_len < header_len {
                    return Err(Error::malformed(
                        0,
                        format!("bad IPv4 lengths (header {header_len}, total {total_len})"),
                    ));
                }
                total_len
            }
            6 => {
                if packets.len() < 40 {
                    return Err(Error::malformed(0, "truncated IPv6 header"));
                }
                40 + usize::from(u16::from_be_bytes([packets[4], packets[5]]))
            }
            version => {
                return Err(Error::malformed(0, format!("unknown IP version {version}")));
            }
        };

        if len > packets.len() {
            return Err(Error::malformed(
                0,
                format!("packet claims {len} bytes, {} available", packets.len()),
            ));
        }

        Ok(packets.len() - len)
    }
}

/// Lazy walk over the packets of a batch buffer.
///
/// Each step peels one packet off the front. After an error the iterator
/// is exhausted; [`remaining`](Self::remaining) still shows where it stopped.
#[derive(Debug)]
pub struct Boundaries<'a, P: ?Sized> {
    parser: &'a P,
    rest: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a, P: BoundaryParser + ?Sized> Boundaries<'a, P> {
    /// Walk `packets` with `parser`
    pub fn new(parser: &'a P, packets: &'a [u8]) -> Self {
        Self {
            parser,
            rest: packets,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes not yet split off
    pub fn remaining(&self) -> &'a [u8] {
        self.rest
    }

    /// Offset of the next packet within the original buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn peel(&mut self) -> Result<&'a [u8]> {
        let total = self.rest.len();
        let remaining = self
            .parser
            .remaining_after_first(self.rest)
            .map_err(|e| match e {
                Error::MalformedBatch { offset, message } => Error::MalformedBatch {
                    offset: self.offset + offset,
                    message,
                },
                other => other,
            })?;

        if remaining >= total {
            return Err(Error::malformed(
                self.offset,
                format!("parser left {remaining} of {total} bytes"),
            ));
        }

        let (first, tail) = self.rest.split_at(total - remaining);
        self.rest = tail;
        self.offset += first.len();
        Ok(first)
    }
}

impl<'a, P: BoundaryParser + ?Sized> Iterator for Boundaries<'a, P> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let item = self.peel();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Packets of a batch paired positionally with their descriptors.
///
/// Yields [`Error::BatchMismatch`] once if the counts disagree.
#[derive(Debug)]
pub struct Pairs<'a, P: ?Sized> {
    boundaries: Boundaries<'a, P>,
    addrs: &'a [Address],
    index: usize,
    done: bool,
}

impl<'a, P: BoundaryParser + ?Sized> Pairs<'a, P> {
    /// Pair the packets of `packets` with `addrs`
    pub fn new(parser: &'a P, packets: &'a [u8], addrs: &'a [Address]) -> Self {
        Self {
            boundaries: Boundaries::new(parser, packets),
            addrs,
            index: 0,
            done: false,
        }
    }
}

impl<'a, P: BoundaryParser + ?Sized> Iterator for Pairs<'a, P> {
    type Item = Result<(&'a [u8], &'a Address)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let addrs: &'a [Address] = self.addrs;
        match (self.boundaries.next(), addrs.get(self.index)) {
            (None, None) => {
                self.done = true;
                None
            }
            (Some(Err(e)), _) => {
                self.done = true;
                Some(Err(e))
            }
            (Some(Ok(packet)), Some(addr)) => {
                self.index += 1;
                Some(Ok((packet, addr)))
            }
            (Some(Ok(_)), None) => {
                self.done = true;
                let extra = self.boundaries.by_ref().filter(Result::is_ok).count();
                Some(Err(Error::BatchMismatch {
                    packets: self.index + 1 + extra,
                    descriptors: addrs.len(),
                }))
            }
            (None, Some(_)) => {
                self.done = true;
                Some(Err(Error::BatchMismatch {
                    packets: self.index,
                    descriptors: addrs.len(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4(total_len: u16) -> Vec<u8> {
        let mut packet = vec![0u8; usize::from(total_len)];
        packet[0] = 0x45;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());
        packet
    }

    #[test]
    fn test_ipv4_remaining() {
        let mut buf = ipv4(28);
        buf.extend(ipv4(40));
        assert_eq!(IpHeaderParser.remaining_after_first(&buf).unwrap(), 40);
    }

    #[test]
    fn test_ipv6_remaining() {
        let mut packet = vec![0u8; 48];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&8u16.to_be_bytes());
        assert_eq!(IpHeaderParser.remaining_after_first(&packet).unwrap(), 0);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let mut buf = ipv4(60);
        buf.truncate(30);
        assert!(matches!(
            IpHeaderParser.remaining_after_first(&buf),
            Err(Error::MalformedBatch { .. })
        ));
    }

    #[test]
    fn test_error_offset_is_absolute() {
        let mut buf = ipv4(20);
        buf.extend([0x10u8; 20]);
        let mut walk = Boundaries::new(&IpHeaderParser, &buf);
        assert_eq!(walk.next().unwrap().unwrap().len(), 20);
        match walk.next() {
            Some(Err(Error::MalformedBatch { offset, .. })) => assert_eq!(offset, 20),
            other => panic!("unexpected {other:?}"),
        }
        assert!(walk.next().is_none());
        assert_eq!(walk.remaining().len(), 20);
    }

    #[test]
    fn test_zero_progress_parser_stops() {
        struct Stuck;
        impl BoundaryParser for Stuck {
            fn remaining_after_first(&self, packets: &[u8]) -> Result<usize> {
                Ok(packets.len())
            }
        }
        let buf = [1u8; 8];
        let mut walk = Boundaries::new(&Stuck, &buf);
        assert!(matches!(walk.next(), Some(Err(Error::MalformedBatch { .. }))));
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_pairs_count_mismatch() {
        let mut buf = ipv4(20);
        buf.extend(ipv4(24));
        buf.extend(ipv4(28));
        let addrs = [Address::default(); 2];

        let results: Vec<_> = Pairs::new(&IpHeaderParser, &buf, &addrs).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(Error::BatchMismatch {
                packets: 3,
                descriptors: 2
            })
        ));
    }

    #[test]
    fn test_pairs_missing_packets() {
        let buf = ipv4(20);
        let addrs = [Address::default(); 2];
        let results: Vec<_> = Pairs::new(&IpHeaderParser, &buf, &addrs).collect();
        assert!(matches!(
            results.last(),
            Some(Err(Error::BatchMismatch {
                packets: 1,
                descriptors: 2
            }))
        ));
    }
}
