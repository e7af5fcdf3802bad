//! Netlink message envelope (nlmsghdr) and NFLOG message types.
//!
//! The envelope is carried little-endian on the wire; the nested nfgenmsg
//! resource id is not (see [`crate::codec`]). The explicit-endian field
//! types keep that distinction in the type system.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netfilter subsystem identifier for packet logging, packed into the
/// high byte of the envelope type.
pub const NFNL_SUBSYS_ULOG: u16 = 4;

/// Message kind: a packet event forwarded from the kernel.
pub const NFULNL_MSG_PACKET: u16 = 0;
/// Message kind: a configuration request/reply.
pub const NFULNL_MSG_CONFIG: u16 = 1;

/// Build a complete envelope type for the logging subsystem.
#[inline]
pub const fn nfnl_msg_type(kind: u16) -> u16 {
    (NFNL_SUBSYS_ULOG << 8) | kind
}

/// Standard netlink control message types.
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;

/// Netlink message header (mirrors struct nlmsghdr). Little-endian on the
/// wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: U32,
    /// Message type.
    pub nlmsg_type: U16,
    /// Additional flags.
    pub nlmsg_flags: U16,
    /// Sequence number.
    pub nlmsg_seq: U32,
    /// Sending process port ID.
    pub nlmsg_pid: U32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: U32::new(NLMSG_HDRLEN as u32),
            nlmsg_type: U16::new(msg_type),
            nlmsg_flags: U16::new(flags),
            nlmsg_seq: U32::new(0),
            nlmsg_pid: U32::new(0),
        }
    }

    /// Total message length, including this header.
    pub fn len(&self) -> usize {
        self.nlmsg_len.get() as usize
    }

    /// Message type.
    pub fn msg_type(&self) -> u16 {
        self.nlmsg_type.get()
    }

    /// Sequence number.
    pub fn seq(&self) -> u32 {
        self.nlmsg_seq.get()
    }

    /// Check if this is an NFLOG packet event.
    pub fn is_packet_event(&self) -> bool {
        self.msg_type() == nfnl_msg_type(NFULNL_MSG_PACKET)
    }

    /// Check if this is an error message or ACK.
    pub fn is_error(&self) -> bool {
        self.msg_type() == NLMSG_ERROR
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Iterator over the netlink messages packed in one datagram.
///
/// Yields an error for a truncated envelope or one whose declared length
/// overruns the buffer; the iterator is exhausted afterwards, so a
/// malformed datagram is dropped from the first bad envelope on.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<(&'a NlMsgHdr, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        if self.data.len() < NLMSG_HDRLEN {
            let actual = self.data.len();
            self.data = &[];
            return Some(Err(Error::Truncated {
                expected: NLMSG_HDRLEN,
                actual,
            }));
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let msg_len = header.len();
        if msg_len < NLMSG_HDRLEN {
            self.data = &[];
            return Some(Err(Error::InvalidMessage(format!(
                "envelope length {} shorter than header",
                msg_len
            ))));
        }
        if msg_len > self.data.len() {
            let actual = self.data.len();
            self.data = &[];
            return Some(Err(Error::Truncated {
                expected: msg_len,
                actual,
            }));
        }

        let payload = &self.data[NLMSG_HDRLEN..msg_len];
        let aligned_len = nlmsg_align(msg_len);

        // Move to next message
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok((header, payload)))
    }
}
