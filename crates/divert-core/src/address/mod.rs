//! Packet metadata descriptor
//!
//! Every packet or event exchanged with the engine travels with one
//! [`Address`]. Its layout is fixed and shared byte-for-byte with the engine:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 8    | timestamp                               |
//! | 8      | 1    | layer tag                               |
//! | 9      | 1    | event tag                               |
//! | 10     | 1    | flag bits                               |
//! | 11     | 1    | reserved                                |
//! | 12     | 4    | length `<< 12` (low 12 bits reserved)   |
//! | 16     | 64   | layer-specific overlay                  |

mod views;

pub use views::{EndpointData, LayerData, NetworkData, Overlay, ReflectData, OVERLAY_LEN};

use std::fmt;

use bitflags::bitflags;

use crate::consts::{Event, Layer};
use crate::error::{Error, Result};

/// Bits of the length field reserved for the engine
const LENGTH_SHIFT: u32 = 12;

/// Largest logical length the descriptor can carry
pub const LENGTH_MAX: u32 = u32::MAX >> LENGTH_SHIFT;

bitflags! {
    /// Independent boolean attributes of a descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AddressFlags: u8 {
        /// Packet was sniffed (copied, not diverted)
        const SNIFFED = 1 << 0;
        /// Packet is outbound
        const OUTBOUND = 1 << 1;
        /// Packet is loopback
        const LOOPBACK = 1 << 2;
        /// Packet was injected by another session
        const IMPOSTOR = 1 << 3;
        /// Packet is IPv6
        const IPV6 = 1 << 4;
        /// IPv4 header checksum is valid
        const IP_CHECKSUM = 1 << 5;
        /// TCP checksum is valid
        const TCP_CHECKSUM = 1 << 6;
        /// UDP checksum is valid
        const UDP_CHECKSUM = 1 << 7;
    }
}

/// Metadata descriptor attached to every captured or injected packet
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Address {
    timestamp: i64,
    layer: u8,
    event: u8,
    flags: u8,
    reserved: u8,
    length: u32,
    overlay: Overlay,
}

const _: () = assert!(std::mem::size_of::<Address>() == 80);

impl Default for Address {
    fn default() -> Self {
        Self {
            timestamp: 0,
            layer: Layer::Network as u8,
            event: Event::NetworkPacket as u8,
            flags: 0,
            reserved: 0,
            length: 0,
            overlay: [0u8; OVERLAY_LEN],
        }
    }
}

impl Address {
    /// Size of one descriptor on the wire
    pub const SIZE: usize = std::mem::size_of::<Address>();

    /// Zeroed descriptor for injection on `layer`
    pub fn new(layer: Layer, event: Event) -> Self {
        Self {
            layer: layer as u8,
            event: event as u8,
            ..Default::default()
        }
    }

    /// Descriptor for a network packet with the given interface data
    pub fn network(layer: Layer, data: NetworkData) -> Result<Self> {
        let mut addr = Self::new(layer, Event::NetworkPacket);
        addr.set_layer_data(&LayerData::Network(data))?;
        Ok(addr)
    }

    /// Decode a descriptor from its wire bytes
    pub fn from_bytes(bytes: &[u8; Address::SIZE]) -> Self {
        let mut timestamp = [0u8; 8];
        let mut length = [0u8; 4];
        let mut overlay = [0u8; OVERLAY_LEN];
        timestamp.copy_from_slice(&bytes[0..8]);
        length.copy_from_slice(&bytes[12..16]);
        overlay.copy_from_slice(&bytes[16..]);

        Self {
            timestamp: i64::from_ne_bytes(timestamp),
            layer: bytes[8],
            event: bytes[9],
            flags: bytes[10],
            reserved: bytes[11],
            length: u32::from_ne_bytes(length),
            overlay,
        }
    }

    /// Encode the descriptor as its wire bytes
    pub fn to_bytes(&self) -> [u8; Address::SIZE] {
        let mut bytes = [0u8; Address::SIZE];
        bytes[0..8].copy_from_slice(&self.timestamp.to_ne_bytes());
        bytes[8] = self.layer;
        bytes[9] = self.event;
        bytes[10] = self.flags;
        bytes[11] = self.reserved;
        bytes[12..16].copy_from_slice(&self.length.to_ne_bytes());
        bytes[16..].copy_from_slice(&self.overlay);
        bytes
    }

    /// Engine-assigned capture time
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Set the capture time
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Layer tag
    pub fn layer(&self) -> Result<Layer> {
        Layer::try_from(self.layer)
    }

    /// Raw layer tag as stored
    pub fn raw_layer(&self) -> u8 {
        self.layer
    }

    /// Event tag
    pub fn event(&self) -> Result<Event> {
        Event::try_from(self.event)
    }

    /// Set the event tag
    pub fn set_event(&mut self, event: Event) {
        self.event = event as u8;
    }

    /// All flag bits
    pub fn flags(&self) -> AddressFlags {
        AddressFlags::from_bits_retain(self.flags)
    }

    /// Replace all flag bits
    pub fn set_flags(&mut self, flags: AddressFlags) {
        self.flags = flags.bits();
    }

    fn flag(&self, flag: AddressFlags) -> bool {
        self.flags & flag.bits() == flag.bits()
    }

    fn set_flag(&mut self, flag: AddressFlags, on: bool) {
        if on {
            self.flags |= flag.bits();
        } else {
            self.flags &= !flag.bits();
        }
    }

    /// Packet was sniffed
    pub fn sniffed(&self) -> bool {
        self.flag(AddressFlags::SNIFFED)
    }

    /// Set or clear the sniffed bit
    pub fn set_sniffed(&mut self, on: bool) {
        self.set_flag(AddressFlags::SNIFFED, on);
    }

    /// Packet is outbound
    pub fn outbound(&self) -> bool {
        self.flag(AddressFlags::OUTBOUND)
    }

    /// Set or clear the outbound bit
    pub fn set_outbound(&mut self, on: bool) {
        self.set_flag(AddressFlags::OUTBOUND, on);
    }

    /// Packet is loopback
    pub fn loopback(&self) -> bool {
        self.flag(AddressFlags::LOOPBACK)
    }

    /// Set or clear the loopback bit
    pub fn set_loopback(&mut self, on: bool) {
        self.set_flag(AddressFlags::LOOPBACK, on);
    }

    /// Packet is an impostor
    pub fn impostor(&self) -> bool {
        self.flag(AddressFlags::IMPOSTOR)
    }

    /// Set or clear the impostor bit
    pub fn set_impostor(&mut self, on: bool) {
        self.set_flag(AddressFlags::IMPOSTOR, on);
    }

    /// Packet is IPv6
    pub fn ipv6(&self) -> bool {
        self.flag(AddressFlags::IPV6)
    }

    /// Set or clear the IPv6 bit
    pub fn set_ipv6(&mut self, on: bool) {
        self.set_flag(AddressFlags::IPV6, on);
    }

    /// IPv4 checksum is valid
    pub fn ip_checksum(&self) -> bool {
        self.flag(AddressFlags::IP_CHECKSUM)
    }

    /// Set or clear the IPv4 checksum bit
    pub fn set_ip_checksum(&mut self, on: bool) {
        self.set_flag(AddressFlags::IP_CHECKSUM, on);
    }

    /// TCP checksum is valid
    pub fn tcp_checksum(&self) -> bool {
        self.flag(AddressFlags::TCP_CHECKSUM)
    }

    /// Set or clear the TCP checksum bit
    pub fn set_tcp_checksum(&mut self, on: bool) {
        self.set_flag(AddressFlags::TCP_CHECKSUM, on);
    }

    /// UDP checksum is valid
    pub fn udp_checksum(&self) -> bool {
        self.flag(AddressFlags::UDP_CHECKSUM)
    }

    /// Set or clear the UDP checksum bit
    pub fn set_udp_checksum(&mut self, on: bool) {
        self.set_flag(AddressFlags::UDP_CHECKSUM, on);
    }

    /// Logical packet length
    pub fn length(&self) -> u32 {
        self.length >> LENGTH_SHIFT
    }

    /// Set the logical packet length, keeping the engine's reserved bits
    pub fn set_length(&mut self, len: u32) -> Result<()> {
        if len > LENGTH_MAX {
            return Err(Error::LengthOverflow(len));
        }
        let reserved = self.length & ((1 << LENGTH_SHIFT) - 1);
        self.length = (len << LENGTH_SHIFT) | reserved;
        Ok(())
    }

    /// Raw overlay bytes
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Decode the overlay with the view selected by the layer tag
    pub fn layer_data(&self) -> Result<LayerData> {
        Ok(LayerData::decode(self.layer()?, &self.overlay))
    }

    /// Write `data` into the overlay; the view must belong to this layer
    pub fn set_layer_data(&mut self, data: &LayerData) -> Result<()> {
        let layer = self.layer()?;
        if !data.belongs_to(layer) {
            return Err(Error::LayerMismatch {
                expected: layer,
                found: data.layer(),
            });
        }
        data.encode(&mut self.overlay);
        Ok(())
    }

    /// Network view, if this descriptor is on a network layer
    pub fn network_data(&self) -> Option<NetworkData> {
        match self.layer_data().ok()? {
            LayerData::Network(data) => Some(data),
            _ => None,
        }
    }

    /// Flow view, if this descriptor is on the flow layer
    pub fn flow_data(&self) -> Option<EndpointData> {
        match self.layer_data().ok()? {
            LayerData::Flow(data) => Some(data),
            _ => None,
        }
    }

    /// Socket view, if this descriptor is on the socket layer
    pub fn socket_data(&self) -> Option<EndpointData> {
        match self.layer_data().ok()? {
            LayerData::Socket(data) => Some(data),
            _ => None,
        }
    }

    /// Reflect view, if this descriptor is on the reflect layer
    pub fn reflect_data(&self) -> Option<ReflectData> {
        match self.layer_data().ok()? {
            LayerData::Reflect(data) => Some(data),
            _ => None,
        }
    }

    /// Whether the event tag is one the layer tag can report
    pub fn is_consistent(&self) -> bool {
        match (self.layer(), self.event()) {
            (Ok(layer), Ok(event)) => event.belongs_to(layer),
            _ => false,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Address");
        s.field("timestamp", &self.timestamp)
            .field("layer", &self.layer)
            .field("event", &self.event)
            .field("flags", &self.flags())
            .field("length", &self.length());
        match self.layer_data() {
            Ok(data) => s.field("data", &data),
            Err(_) => s.field("overlay", &self.overlay),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_offsets() {
        let mut addr = Address::new(Layer::Flow, Event::FlowEstablished);
        addr.set_timestamp(0x0102_0304_0506_0708);
        addr.set_outbound(true);
        addr.set_length(100).unwrap();

        // SAFETY: Address is repr(C), 80 bytes, no padding and no pointers
        let bytes: [u8; Address::SIZE] = unsafe { std::mem::transmute(addr) };
        assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708i64.to_ne_bytes());
        assert_eq!(bytes[8], Layer::Flow as u8);
        assert_eq!(bytes[9], Event::FlowEstablished as u8);
        assert_eq!(bytes[10], AddressFlags::OUTBOUND.bits());
        assert_eq!(bytes[11], 0);
        assert_eq!(&bytes[12..16], &(100u32 << 12).to_ne_bytes());
        assert_eq!(addr.to_bytes(), bytes);
        assert_eq!(Address::from_bytes(&bytes), addr);
    }

    #[test]
    fn test_set_layer_data_mismatch() {
        let mut addr = Address::new(Layer::Network, Event::NetworkPacket);
        let err = addr
            .set_layer_data(&LayerData::Socket(EndpointData::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LayerMismatch {
                expected: Layer::Network,
                found: Layer::Socket
            }
        ));
    }

    #[test]
    fn test_forward_layer_uses_network_view() {
        let data = NetworkData {
            interface_index: 3,
            subinterface_index: 1,
        };
        let addr = Address::network(Layer::NetworkForward, data).unwrap();
        assert_eq!(addr.network_data(), Some(data));
        assert_eq!(addr.socket_data(), None);
    }

    #[test]
    fn test_length_keeps_reserved_bits() {
        let mut addr = Address::default();
        addr.length = 0xABC;
        addr.set_length(1500).unwrap();
        assert_eq!(addr.length(), 1500);
        assert_eq!(addr.length & 0xFFF, 0xABC);
    }

    #[test]
    fn test_length_overflow() {
        let mut addr = Address::default();
        assert!(matches!(
            addr.set_length(LENGTH_MAX + 1),
            Err(Error::LengthOverflow(_))
        ));
    }

    #[test]
    fn test_unknown_layer_tag() {
        let mut addr = Address::default();
        addr.layer = 9;
        assert!(addr.layer_data().is_err());
        assert!(!addr.is_consistent());
    }
}
