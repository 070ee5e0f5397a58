//! Layer-specific interpretations of the descriptor overlay
//!
//! The 64-byte overlay carries exactly one of these shapes, selected by the
//! descriptor's layer tag. Offsets follow the engine's C layout with native
//! byte order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::consts::Layer;
use crate::error::Result;

/// Size of the overlay region in bytes
pub const OVERLAY_LEN: usize = 64;

/// Overlay storage
pub type Overlay = [u8; OVERLAY_LEN];

fn read_u16(buf: &Overlay, offset: usize) -> u16 {
    u16::from_ne_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &Overlay, offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_u64(buf: &Overlay, offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

fn write(buf: &mut Overlay, offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Network and forward layer data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkData {
    /// Interface the packet was seen on
    pub interface_index: u32,
    /// Sub-interface the packet was seen on
    pub subinterface_index: u32,
}

impl NetworkData {
    /// Reinterpret the first 8 overlay bytes as network layer data.
    ///
    /// No layer check is made here: callers must only use the result when
    /// the owning descriptor is on a network layer, otherwise the values
    /// are meaningless. Prefer [`Address::layer_data`](crate::Address::layer_data).
    pub fn from_overlay(overlay: &Overlay) -> Self {
        Self {
            interface_index: read_u32(overlay, 0),
            subinterface_index: read_u32(overlay, 4),
        }
    }

    fn write_to(&self, overlay: &mut Overlay) {
        write(overlay, 0, &self.interface_index.to_ne_bytes());
        write(overlay, 4, &self.subinterface_index.to_ne_bytes());
    }
}

/// Flow and socket layer data (both layers share this shape)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointData {
    /// Endpoint ID
    pub endpoint_id: u64,
    /// Parent endpoint ID
    pub parent_endpoint_id: u64,
    /// Owning process ID
    pub process_id: u32,
    /// Local address as four host-order words, least significant first
    pub local_addr: [u32; 4],
    /// Remote address as four host-order words, least significant first
    pub remote_addr: [u32; 4],
    /// Local port
    pub local_port: u16,
    /// Remote port
    pub remote_port: u16,
    /// IP protocol number
    pub protocol: u8,
}

impl EndpointData {
    /// Reinterpret the overlay as flow/socket data without a layer check.
    ///
    /// Same contract as [`NetworkData::from_overlay`].
    pub fn from_overlay(overlay: &Overlay) -> Self {
        let words = |offset: usize| {
            [
                read_u32(overlay, offset),
                read_u32(overlay, offset + 4),
                read_u32(overlay, offset + 8),
                read_u32(overlay, offset + 12),
            ]
        };

        Self {
            endpoint_id: read_u64(overlay, 0),
            parent_endpoint_id: read_u64(overlay, 8),
            process_id: read_u32(overlay, 16),
            local_addr: words(20),
            remote_addr: words(36),
            local_port: read_u16(overlay, 52),
            remote_port: read_u16(overlay, 54),
            protocol: overlay[56],
        }
    }

    fn write_to(&self, overlay: &mut Overlay) {
        write(overlay, 0, &self.endpoint_id.to_ne_bytes());
        write(overlay, 8, &self.parent_endpoint_id.to_ne_bytes());
        write(overlay, 16, &self.process_id.to_ne_bytes());
        for (i, word) in self.local_addr.iter().enumerate() {
            write(overlay, 20 + i * 4, &word.to_ne_bytes());
        }
        for (i, word) in self.remote_addr.iter().enumerate() {
            write(overlay, 36 + i * 4, &word.to_ne_bytes());
        }
        write(overlay, 52, &self.local_port.to_ne_bytes());
        write(overlay, 54, &self.remote_port.to_ne_bytes());
        overlay[56] = self.protocol;
    }

    /// Local address
    pub fn local_ip(&self) -> IpAddr {
        words_to_ip(self.local_addr)
    }

    /// Remote address
    pub fn remote_ip(&self) -> IpAddr {
        words_to_ip(self.remote_addr)
    }

    /// Set the local address
    pub fn set_local_ip(&mut self, ip: IpAddr) {
        self.local_addr = ip_to_words(ip);
    }

    /// Set the remote address
    pub fn set_remote_ip(&mut self, ip: IpAddr) {
        self.remote_addr = ip_to_words(ip);
    }
}

// The engine stores addresses as IPv6 in reversed word order; IPv4 is
// carried as ::ffff:a.b.c.d.
fn words_to_ip(words: [u32; 4]) -> IpAddr {
    if words[3] == 0 && words[2] == 0 && words[1] == 0x0000_ffff {
        return IpAddr::V4(Ipv4Addr::from(words[0]));
    }

    let mut bytes = [0u8; 16];
    for (i, word) in words.iter().rev().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    IpAddr::V6(Ipv6Addr::from(bytes))
}

fn ip_to_words(ip: IpAddr) -> [u32; 4] {
    match ip {
        IpAddr::V4(v4) => [u32::from(v4), 0x0000_ffff, 0, 0],
        IpAddr::V6(v6) => {
            let bytes = v6.octets();
            let mut words = [0u32; 4];
            for (i, chunk) in bytes.chunks_exact(4).enumerate() {
                words[3 - i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            words
        }
    }
}

/// Reflect layer data: describes another engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReflectData {
    /// Time the reflected session was opened
    pub timestamp: i64,
    /// Process that opened it
    pub process_id: u32,
    /// Raw layer tag of the reflected session
    pub layer: u32,
    /// Raw open flags of the reflected session
    pub flags: u64,
    /// Priority of the reflected session
    pub priority: i16,
}

impl ReflectData {
    /// Reinterpret the overlay as reflect data without a layer check.
    ///
    /// Same contract as [`NetworkData::from_overlay`].
    pub fn from_overlay(overlay: &Overlay) -> Self {
        Self {
            timestamp: read_u64(overlay, 0) as i64,
            process_id: read_u32(overlay, 8),
            layer: read_u32(overlay, 12),
            flags: read_u64(overlay, 16),
            priority: read_u16(overlay, 24) as i16,
        }
    }

    fn write_to(&self, overlay: &mut Overlay) {
        write(overlay, 0, &self.timestamp.to_ne_bytes());
        write(overlay, 8, &self.process_id.to_ne_bytes());
        write(overlay, 12, &self.layer.to_ne_bytes());
        write(overlay, 16, &self.flags.to_ne_bytes());
        write(overlay, 24, &self.priority.to_ne_bytes());
    }

    /// Layer the reflected session targets
    pub fn layer(&self) -> Result<Layer> {
        Layer::from_raw(self.layer)
    }

    /// Open flags of the reflected session
    pub fn open_flags(&self) -> crate::OpenFlags {
        crate::OpenFlags::from_bits_retain(self.flags)
    }
}

/// Decoded overlay, one variant per view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerData {
    /// Network or network-forward layer
    Network(NetworkData),
    /// Flow layer
    Flow(EndpointData),
    /// Socket layer
    Socket(EndpointData),
    /// Reflect layer
    Reflect(ReflectData),
}

impl LayerData {
    /// Decode the overlay using the view selected by `layer`
    pub fn decode(layer: Layer, overlay: &Overlay) -> Self {
        match layer {
            Layer::Network | Layer::NetworkForward => {
                LayerData::Network(NetworkData::from_overlay(overlay))
            }
            Layer::Flow => LayerData::Flow(EndpointData::from_overlay(overlay)),
            Layer::Socket => LayerData::Socket(EndpointData::from_overlay(overlay)),
            Layer::Reflect => LayerData::Reflect(ReflectData::from_overlay(overlay)),
        }
    }

    /// Write this view into `overlay`, zeroing the bytes it does not use
    pub fn encode(&self, overlay: &mut Overlay) {
        *overlay = [0u8; OVERLAY_LEN];
        match self {
            LayerData::Network(data) => data.write_to(overlay),
            LayerData::Flow(data) | LayerData::Socket(data) => data.write_to(overlay),
            LayerData::Reflect(data) => data.write_to(overlay),
        }
    }

    /// Whether a descriptor on `layer` carries this view
    pub fn belongs_to(&self, layer: Layer) -> bool {
        match self {
            LayerData::Network(_) => layer.carries_packets(),
            LayerData::Flow(_) => layer == Layer::Flow,
            LayerData::Socket(_) => layer == Layer::Socket,
            LayerData::Reflect(_) => layer == Layer::Reflect,
        }
    }

    /// Canonical layer of this view
    pub fn layer(&self) -> Layer {
        match self {
            LayerData::Network(_) => Layer::Network,
            LayerData::Flow(_) => Layer::Flow,
            LayerData::Socket(_) => Layer::Socket,
            LayerData::Reflect(_) => Layer::Reflect,
        }
    }
}
