//! Engine tags, flags and limits
//!
//! Numeric values match the engine's conventions exactly; they travel
//! across the engine boundary unchanged.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest accepted session priority
pub const PRIORITY_LOWEST: i16 = -PRIORITY_HIGHEST;
/// Default session priority
pub const PRIORITY_DEFAULT: i16 = 0;
/// Highest accepted session priority
pub const PRIORITY_HIGHEST: i16 = 3000;

/// Default packet queue length
pub const QUEUE_LENGTH_DEFAULT: u64 = 4096;
/// Minimum packet queue length
pub const QUEUE_LENGTH_MIN: u64 = 32;
/// Maximum packet queue length
pub const QUEUE_LENGTH_MAX: u64 = 16384;
/// Default packet queue time (ms)
pub const QUEUE_TIME_DEFAULT: u64 = 2000;
/// Minimum packet queue time (ms)
pub const QUEUE_TIME_MIN: u64 = 100;
/// Maximum packet queue time (ms)
pub const QUEUE_TIME_MAX: u64 = 16000;
/// Default packet queue size (bytes)
pub const QUEUE_SIZE_DEFAULT: u64 = 4_194_304;
/// Minimum packet queue size (bytes)
pub const QUEUE_SIZE_MIN: u64 = 65535;
/// Maximum packet queue size (bytes)
pub const QUEUE_SIZE_MAX: u64 = 33_554_432;

/// Maximum number of descriptors in one batched exchange
pub const BATCH_MAX: usize = 0xff;
/// Largest packet the engine will deliver
pub const MTU_MAX: usize = 40 + 0xffff;

/// Interception layer a session is opened against
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    /// Network packets to/from the local host
    Network = 0,
    /// Forwarded network packets
    NetworkForward = 1,
    /// Flow established/deleted events
    Flow = 2,
    /// Socket operation events
    Socket = 3,
    /// Events about engine sessions themselves
    Reflect = 4,
}

impl Layer {
    /// All layers in tag order
    pub const ALL: [Layer; 5] = [
        Layer::Network,
        Layer::NetworkForward,
        Layer::Flow,
        Layer::Socket,
        Layer::Reflect,
    ];

    /// Decode a layer tag
    pub fn from_raw(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Layer::Network),
            1 => Ok(Layer::NetworkForward),
            2 => Ok(Layer::Flow),
            3 => Ok(Layer::Socket),
            4 => Ok(Layer::Reflect),
            _ => Err(Error::UnknownLayer(tag)),
        }
    }

    /// Whether packets on this layer carry payload bytes
    pub fn carries_packets(self) -> bool {
        matches!(self, Layer::Network | Layer::NetworkForward)
    }
}

impl TryFrom<u8> for Layer {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Self::from_raw(u32::from(tag))
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Network => "WINDIVERT_LAYER_NETWORK",
            Layer::NetworkForward => "WINDIVERT_LAYER_NETWORK_FORWARD",
            Layer::Flow => "WINDIVERT_LAYER_FLOW",
            Layer::Socket => "WINDIVERT_LAYER_SOCKET",
            Layer::Reflect => "WINDIVERT_LAYER_REFLECT",
        };
        f.write_str(name)
    }
}

/// Kind of occurrence a descriptor records
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    /// Network packet
    NetworkPacket = 0,
    /// Flow established
    FlowEstablished = 1,
    /// Flow deleted
    FlowDeleted = 2,
    /// Socket bind
    SocketBind = 3,
    /// Socket connect
    SocketConnect = 4,
    /// Socket listen
    SocketListen = 5,
    /// Socket accept
    SocketAccept = 6,
    /// Socket close
    SocketClose = 7,
    /// Engine handle opened
    ReflectOpen = 8,
    /// Engine handle closed
    ReflectClose = 9,
}

impl Event {
    /// Layers on which this event can be reported
    pub fn belongs_to(self, layer: Layer) -> bool {
        match self {
            Event::NetworkPacket => layer.carries_packets(),
            Event::FlowEstablished | Event::FlowDeleted => layer == Layer::Flow,
            Event::SocketBind
            | Event::SocketConnect
            | Event::SocketListen
            | Event::SocketAccept
            | Event::SocketClose => layer == Layer::Socket,
            Event::ReflectOpen | Event::ReflectClose => layer == Layer::Reflect,
        }
    }
}

impl TryFrom<u8> for Event {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Event::NetworkPacket),
            1 => Ok(Event::FlowEstablished),
            2 => Ok(Event::FlowDeleted),
            3 => Ok(Event::SocketBind),
            4 => Ok(Event::SocketConnect),
            5 => Ok(Event::SocketListen),
            6 => Ok(Event::SocketAccept),
            7 => Ok(Event::SocketClose),
            8 => Ok(Event::ReflectOpen),
            9 => Ok(Event::ReflectClose),
            _ => Err(Error::UnknownEvent(tag)),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::NetworkPacket => "WINDIVERT_EVENT_NETWORK_PACKET",
            Event::FlowEstablished => "WINDIVERT_EVENT_FLOW_ESTABLISHED",
            Event::FlowDeleted => "WINDIVERT_EVENT_FLOW_DELETED",
            Event::SocketBind => "WINDIVERT_EVENT_SOCKET_BIND",
            Event::SocketConnect => "WINDIVERT_EVENT_SOCKET_CONNECT",
            Event::SocketListen => "WINDIVERT_EVENT_SOCKET_LISTEN",
            Event::SocketAccept => "WINDIVERT_EVENT_SOCKET_ACCEPT",
            Event::SocketClose => "WINDIVERT_EVENT_SOCKET_CLOSE",
            Event::ReflectOpen => "WINDIVERT_EVENT_REFLECT_OPEN",
            Event::ReflectClose => "WINDIVERT_EVENT_REFLECT_CLOSE",
        };
        f.write_str(name)
    }
}

/// Direction(s) disabled by a shutdown
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownHow {
    /// Stop receiving
    Recv = 0,
    /// Stop sending
    Send = 1,
    /// Stop both
    Both = 2,
}

impl ShutdownHow {
    /// Whether receiving is disabled
    pub fn covers_recv(self) -> bool {
        matches!(self, ShutdownHow::Recv | ShutdownHow::Both)
    }

    /// Whether sending is disabled
    pub fn covers_send(self) -> bool {
        matches!(self, ShutdownHow::Send | ShutdownHow::Both)
    }

    /// Combine two shutdowns applied to the same session
    pub fn merge(self, other: ShutdownHow) -> ShutdownHow {
        if self == other {
            self
        } else {
            ShutdownHow::Both
        }
    }
}

impl fmt::Display for ShutdownHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownHow::Recv => "WINDIVERT_SHUTDOWN_RECV",
            ShutdownHow::Send => "WINDIVERT_SHUTDOWN_SEND",
            ShutdownHow::Both => "WINDIVERT_SHUTDOWN_BOTH",
        };
        f.write_str(name)
    }
}

/// Session parameter identifier
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Param {
    /// Packet queue length
    QueueLength = 0,
    /// Packet queue time (ms)
    QueueTime = 1,
    /// Packet queue size (bytes)
    QueueSize = 2,
    /// Driver major version
    VersionMajor = 3,
    /// Driver minor version
    VersionMinor = 4,
}

impl Param {
    /// Parse a parameter by its lowercase name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "queue-length" => Some(Param::QueueLength),
            "queue-time" => Some(Param::QueueTime),
            "queue-size" => Some(Param::QueueSize),
            "version-major" => Some(Param::VersionMajor),
            "version-minor" => Some(Param::VersionMinor),
            _ => None,
        }
    }

    /// Whether the engine accepts writes to this parameter
    pub fn is_read_only(self) -> bool {
        matches!(self, Param::VersionMajor | Param::VersionMinor)
    }

    /// Accepted `(min, max)` range for tunable parameters
    pub fn range(self) -> Option<(u64, u64)> {
        match self {
            Param::QueueLength => Some((QUEUE_LENGTH_MIN, QUEUE_LENGTH_MAX)),
            Param::QueueTime => Some((QUEUE_TIME_MIN, QUEUE_TIME_MAX)),
            Param::QueueSize => Some((QUEUE_SIZE_MIN, QUEUE_SIZE_MAX)),
            Param::VersionMajor | Param::VersionMinor => None,
        }
    }

    /// Check that `value` may be written to this parameter
    pub fn validate(self, value: u64) -> Result<()> {
        let (min, max) = self.range().ok_or(Error::ReadOnlyParam(self))?;
        if value < min || value > max {
            return Err(Error::ParamOutOfRange {
                param: self,
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Param::QueueLength => "WINDIVERT_PARAM_QUEUE_LENGTH",
            Param::QueueTime => "WINDIVERT_PARAM_QUEUE_TIME",
            Param::QueueSize => "WINDIVERT_PARAM_QUEUE_SIZE",
            Param::VersionMajor => "WINDIVERT_PARAM_VERSION_MAJOR",
            Param::VersionMinor => "WINDIVERT_PARAM_VERSION_MINOR",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Flags passed to the engine when opening a session
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u64 {
        /// Copy packets instead of diverting them
        const SNIFF = 0x0001;
        /// Drop matching packets without delivering them
        const DROP = 0x0002;
        /// Receive only
        const RECV_ONLY = 0x0004;
        /// Alias of `RECV_ONLY`
        const READ_ONLY = Self::RECV_ONLY.bits();
        /// Send only
        const SEND_ONLY = 0x0008;
        /// Alias of `SEND_ONLY`
        const WRITE_ONLY = Self::SEND_ONLY.bits();
        /// Do not install the driver if it is missing
        const NO_INSTALL = 0x0010;
        /// Deliver IP fragments
        const FRAGMENTS = 0x0020;
    }
}

impl OpenFlags {
    /// Parse a flag by its lowercase name
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "sniff" => Some(Self::SNIFF),
            "drop" => Some(Self::DROP),
            "recv-only" | "read-only" => Some(Self::RECV_ONLY),
            "send-only" | "write-only" => Some(Self::SEND_ONLY),
            "no-install" => Some(Self::NO_INSTALL),
            "fragments" => Some(Self::FRAGMENTS),
            _ => None,
        }
    }
}

bitflags! {
    /// Checksums the engine's checksum helper should leave alone
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChecksumFlags: u64 {
        /// Skip the IPv4 header checksum
        const NO_IP = 0x0001;
        /// Skip ICMP checksums
        const NO_ICMP = 0x0002;
        /// Skip ICMPv6 checksums
        const NO_ICMPV6 = 0x0004;
        /// Skip TCP checksums
        const NO_TCP = 0x0008;
        /// Skip UDP checksums
        const NO_UDP = 0x0010;
    }
}

impl ChecksumFlags {
    /// Recompute every checksum
    pub const DEFAULT: Self = Self::empty();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_roundtrip_tags() {
        for layer in Layer::ALL {
            assert_eq!(Layer::try_from(layer as u8).unwrap(), layer);
        }
        assert!(matches!(Layer::try_from(5u8), Err(Error::UnknownLayer(5))));
    }

    #[test]
    fn test_event_layer_membership() {
        assert!(Event::NetworkPacket.belongs_to(Layer::NetworkForward));
        assert!(Event::FlowDeleted.belongs_to(Layer::Flow));
        assert!(!Event::SocketBind.belongs_to(Layer::Flow));
        assert!(Event::ReflectOpen.belongs_to(Layer::Reflect));
    }

    #[test]
    fn test_param_validation() {
        assert!(Param::QueueLength.validate(QUEUE_LENGTH_DEFAULT).is_ok());
        assert!(Param::QueueTime.validate(QUEUE_TIME_MIN - 1).is_err());
        assert!(matches!(
            Param::VersionMajor.validate(1),
            Err(Error::ReadOnlyParam(Param::VersionMajor))
        ));
        assert_eq!(Param::from_name("QUEUE_TIME"), Some(Param::QueueTime));
        assert_eq!(Param::from_name("queue"), None);
    }

    #[test]
    fn test_open_flag_values() {
        let flags = OpenFlags::SNIFF | OpenFlags::FRAGMENTS;
        assert_eq!(flags.bits(), 0x0001 | 0x0020);
        assert_eq!(OpenFlags::READ_ONLY, OpenFlags::RECV_ONLY);
        assert_eq!(OpenFlags::parse_name("recv_only"), Some(OpenFlags::RECV_ONLY));
        assert_eq!(OpenFlags::parse_name("bogus"), None);
    }

    #[test]
    fn test_checksum_flag_values() {
        assert_eq!(ChecksumFlags::DEFAULT.bits(), 0);
        assert_eq!(ChecksumFlags::default(), ChecksumFlags::DEFAULT);
        assert_eq!(
            (ChecksumFlags::NO_IP | ChecksumFlags::NO_TCP | ChecksumFlags::NO_UDP).bits(),
            1 | 8 | 16
        );
        assert_eq!(ChecksumFlags::NO_ICMP.bits(), 2);
        assert_eq!(ChecksumFlags::NO_ICMPV6.bits(), 4);
    }

    #[test]
    fn test_shutdown_merge() {
        assert_eq!(ShutdownHow::Recv.merge(ShutdownHow::Recv), ShutdownHow::Recv);
        assert_eq!(ShutdownHow::Recv.merge(ShutdownHow::Send), ShutdownHow::Both);
        assert!(ShutdownHow::Both.covers_recv());
    }

    #[test]
    fn test_serde_names() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Tags {
            event: Event,
            how: ShutdownHow,
            param: Param,
        }

        let text = "event = \"socket-connect\"\nhow = \"both\"\nparam = \"queue-time\"\n";
        let tags: Tags = toml::from_str(text).unwrap();
        assert_eq!(
            tags,
            Tags {
                event: Event::SocketConnect,
                how: ShutdownHow::Both,
                param: Param::QueueTime,
            }
        );
        assert_eq!(toml::to_string(&tags).unwrap(), text);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Layer::Flow.to_string(), "WINDIVERT_LAYER_FLOW");
        assert_eq!(Param::QueueSize.to_string(), "WINDIVERT_PARAM_QUEUE_SIZE");
    }
}
