//! Decoded NFLOG packet-event records.

use super::attr::{AttrIter, get};
use super::codec::NfGenMsg;
use super::error::{Error, Result};

/// Packet attribute tags (NFULA_*).
pub mod nfula {
    pub const PACKET_HDR: u16 = 1;
    /// Packet mark from the skbuff.
    pub const MARK: u16 = 2;
    /// Capture timestamp, two consecutive big-endian u64 (sec, usec).
    pub const TIMESTAMP: u16 = 3;
    /// Ifindex of the device the packet was received on.
    pub const IFINDEX_INDEV: u16 = 4;
    /// Ifindex of the device the packet was transmitted on.
    pub const IFINDEX_OUTDEV: u16 = 5;
    pub const IFINDEX_PHYSINDEV: u16 = 6;
    pub const IFINDEX_PHYSOUTDEV: u16 = 7;
    /// Hardware address of the packet's device.
    pub const HWADDR: u16 = 8;
    /// Packet payload.
    pub const PAYLOAD: u16 = 9;
    /// Free-text rule prefix, NUL-terminated on the wire.
    pub const PREFIX: u16 = 10;
    /// UID owning the socket the packet was sent/received on.
    pub const UID: u16 = 11;
    pub const SEQ: u16 = 12;
    pub const SEQ_GLOBAL: u16 = 13;
    /// GID owning the socket the packet was sent/received on.
    pub const GID: u16 = 14;
    /// ARPHRD_ type of the packet's device.
    pub const HWTYPE: u16 = 15;
    /// MAC-layer header bytes.
    pub const HWHEADER: u16 = 16;
    pub const HWLEN: u16 = 17;
}

/// Capture timestamp of a logged packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since the epoch.
    pub sec: u64,
    /// Microsecond remainder.
    pub usec: u64,
}

/// Hardware address of the device a packet crossed (mirrors struct
/// nfulnl_msg_packet_hw: big-endian length, 2 pad bytes, 8 address bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwAddr {
    len: u8,
    addr: [u8; 8],
}

impl HwAddr {
    /// The address bytes actually present.
    pub fn bytes(&self) -> &[u8] {
        &self.addr[..self.len as usize]
    }

    fn parse(value: &[u8]) -> Result<Self> {
        if value.len() < 4 {
            return Err(Error::InvalidAttribute(
                "truncated hardware address attribute".into(),
            ));
        }
        let declared = get::u16_be(value)? as usize;
        let avail = value.len() - 4;
        let len = declared.min(avail).min(8);
        let mut addr = [0u8; 8];
        addr[..len].copy_from_slice(&value[4..4 + len]);
        Ok(Self {
            len: len as u8,
            addr,
        })
    }
}

/// One decoded packet-event message.
///
/// Every field beyond `family` and `group` is optional: it is `Some` only
/// when the corresponding attribute was present in the message, so a
/// present-but-zero value is distinguishable from an absent one.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Address family of the logged packet.
    pub family: u8,
    /// Log group the packet was routed to.
    pub group: u16,
    /// Rule prefix string, NUL terminator stripped.
    pub prefix: Option<String>,
    /// Packet payload bytes, capped by the configured copy range.
    pub payload: Option<Vec<u8>>,
    /// UID owning the originating socket.
    pub uid: Option<u32>,
    /// GID owning the originating socket.
    pub gid: Option<u32>,
    /// Receiving interface index.
    pub indev: Option<u32>,
    /// Transmitting interface index.
    pub outdev: Option<u32>,
    /// Firewall mark.
    pub mark: Option<u32>,
    /// Capture timestamp.
    pub timestamp: Option<Timestamp>,
    /// Link-layer (ARPHRD_) type.
    pub hw_type: Option<u16>,
    /// MAC-layer header bytes.
    pub hw_header: Option<Vec<u8>>,
    /// Hardware address.
    pub hw_addr: Option<HwAddr>,
}

impl Packet {
    /// Decode the body of a packet-event message (nfgenmsg followed by
    /// the attribute stream) in a single pass.
    ///
    /// Unknown attribute types are skipped, never fatal; a structurally
    /// bad attribute fails the whole message.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let (body, attrs) = NfGenMsg::from_prefix(payload)?;

        let mut packet = Packet {
            family: body.family,
            group: body.res_id,
            ..Default::default()
        };

        for attr in AttrIter::new(attrs) {
            let (kind, value) = attr?;
            match kind {
                nfula::PREFIX => packet.prefix = Some(get::string(value)?.to_owned()),
                nfula::PAYLOAD => packet.payload = Some(value.to_vec()),
                nfula::UID => packet.uid = Some(get::u32_be(value)?),
                nfula::GID => packet.gid = Some(get::u32_be(value)?),
                nfula::IFINDEX_INDEV => packet.indev = Some(get::u32_be(value)?),
                nfula::IFINDEX_OUTDEV => packet.outdev = Some(get::u32_be(value)?),
                nfula::MARK => packet.mark = Some(get::u32_be(value)?),
                nfula::TIMESTAMP => {
                    if value.len() < 16 {
                        return Err(Error::InvalidAttribute(
                            "truncated timestamp attribute".into(),
                        ));
                    }
                    packet.timestamp = Some(Timestamp {
                        sec: get::u64_be(&value[..8])?,
                        usec: get::u64_be(&value[8..16])?,
                    });
                }
                nfula::HWTYPE => packet.hw_type = Some(get::u16_be(value)?),
                nfula::HWHEADER => packet.hw_header = Some(value.to_vec()),
                nfula::HWADDR => packet.hw_addr = Some(HwAddr::parse(value)?),
                _ => {}
            }
        }

        Ok(packet)
    }
}
