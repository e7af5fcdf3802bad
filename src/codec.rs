//! Wire codec for NFLOG configuration messages.
//!
//! The two outbound layouts are fixed: a command datagram is 25 bytes
//! (envelope + nfgenmsg + one command attribute), a mode datagram is 30
//! bytes (envelope + nfgenmsg + one mode attribute). The envelope length
//! is the exact byte count, without trailing alignment of the final
//! attribute; this is what the kernel expects and what interoperating
//! implementations emit.

use winnow::binary::{be_u16, le_u8};
use winnow::error::ContextError;
use winnow::prelude::*;

use super::attr::NlAttr;
use super::error::{Error, Result};
use super::message::{NFULNL_MSG_CONFIG, NLM_F_ACK, NLM_F_REQUEST, NlMsgHdr, nfnl_msg_type};
use zerocopy::byteorder::little_endian::U32;

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, winnow::error::ErrMode<ContextError>>;

/// Protocol version carried in every nfgenmsg (NFNETLINK_V0).
pub const NFNETLINK_V0: u8 = 0;

/// Attribute tag of the command payload in a configuration message.
pub const NFULA_CFG_CMD: u16 = 1;
/// Attribute tag of the copy-mode payload in a configuration message.
pub const NFULA_CFG_MODE: u16 = 2;

/// Size of the nfgenmsg header.
pub const NFGENMSG_LEN: usize = 4;

/// Exact size of an encoded configuration command datagram.
pub const CONFIG_CMD_LEN: usize = 25;
/// Exact size of an encoded configuration mode datagram.
pub const CONFIG_MODE_LEN: usize = 30;

/// Configuration commands (NFULNL_CFG_CMD_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigCmd {
    /// No operation.
    None = 0,
    /// Bind this socket to a log group.
    Bind = 1,
    /// Unbind this socket from a log group.
    Unbind = 2,
    /// Register as the logging backend for a protocol family.
    PfBind = 3,
    /// Drop any registration for a protocol family.
    PfUnbind = 4,
}

impl ConfigCmd {
    /// Decode a command byte.
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::None),
            1 => Some(Self::Bind),
            2 => Some(Self::Unbind),
            3 => Some(Self::PfBind),
            4 => Some(Self::PfUnbind),
            _ => None,
        }
    }
}

/// How much of a matched packet the kernel copies into the log message
/// (NFULNL_COPY_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CopyMode {
    /// Copy nothing.
    None = 0,
    /// Copy packet metadata only.
    Meta = 1,
    /// Copy packet payload, up to the configured range.
    Packet = 2,
}

/// Generic netfilter message body (mirrors struct nfgenmsg).
///
/// The resource id is big-endian on the wire even though the surrounding
/// envelope is little-endian; both directions of this codec preserve that
/// asymmetry exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfGenMsg {
    /// Address family.
    pub family: u8,
    /// Protocol version, always [`NFNETLINK_V0`].
    pub version: u8,
    /// Group number or address family, depending on message kind.
    pub res_id: u16,
}

impl NfGenMsg {
    /// Create a body for the given family and resource id.
    pub fn new(family: u8, res_id: u16) -> Self {
        Self {
            family,
            version: NFNETLINK_V0,
            res_id,
        }
    }

    /// Parse from a byte stream, advancing the input.
    pub fn parse(input: &mut &[u8]) -> PResult<Self> {
        let family = le_u8.parse_next(input)?;
        let version = le_u8.parse_next(input)?;
        let res_id = be_u16.parse_next(input)?;
        Ok(Self {
            family,
            version,
            res_id,
        })
    }

    /// Parse the leading nfgenmsg of a message payload, returning it with
    /// the remaining bytes.
    pub fn from_prefix(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut input = data;
        let msg = Self::parse(&mut input).map_err(|_| Error::Truncated {
            expected: NFGENMSG_LEN,
            actual: data.len(),
        })?;
        Ok((msg, input))
    }

    /// Append the wire form to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.family);
        buf.push(self.version);
        buf.extend_from_slice(&self.res_id.to_be_bytes());
    }
}

/// Write a configuration envelope with the sequence number stamped in and
/// a placeholder length. NLM_F_ACK is mandatory: without it the kernel
/// stays silent on success and the send-then-wait handshake never gets
/// its reply.
fn put_config_header(buf: &mut Vec<u8>, seq: u32) {
    let mut hdr = NlMsgHdr::new(nfnl_msg_type(NFULNL_MSG_CONFIG), NLM_F_REQUEST | NLM_F_ACK);
    hdr.nlmsg_seq = U32::new(seq);
    buf.extend_from_slice(hdr.as_bytes());
}

/// Patch the envelope length to the exact encoded size.
fn patch_len(buf: &mut [u8]) {
    let len = buf.len() as u32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
}

/// Encode a configuration command datagram.
///
/// For family-scoped commands ([`ConfigCmd::PfBind`] /
/// [`ConfigCmd::PfUnbind`]) `res_id` is zero; for group-scoped commands
/// it is the group number, carried big-endian.
pub fn encode_config_cmd(cmd: ConfigCmd, family: u8, res_id: u16, seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CONFIG_CMD_LEN);
    put_config_header(&mut buf, seq);
    NfGenMsg::new(family, res_id).write(&mut buf);
    buf.extend_from_slice(NlAttr::new(NFULA_CFG_CMD, 1).as_bytes());
    buf.push(cmd as u8);
    patch_len(&mut buf);
    debug_assert_eq!(buf.len(), CONFIG_CMD_LEN);
    buf
}

/// Encode a configuration mode datagram for one group.
///
/// `copy_range` caps the payload bytes copied per packet; zero leaves the
/// capture unlimited while still requesting the given copy mode.
pub fn encode_config_mode(res_id: u16, copy_mode: CopyMode, copy_range: u32, seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CONFIG_MODE_LEN);
    put_config_header(&mut buf, seq);
    // Mode messages are group-scoped; the family slot is unused.
    NfGenMsg::new(libc::AF_UNSPEC as u8, res_id).write(&mut buf);
    buf.extend_from_slice(NlAttr::new(NFULA_CFG_MODE, 6).as_bytes());
    buf.extend_from_slice(&copy_range.to_be_bytes());
    buf.push(copy_mode as u8);
    buf.push(0); // pad
    patch_len(&mut buf);
    debug_assert_eq!(buf.len(), CONFIG_MODE_LEN);
    buf
}
