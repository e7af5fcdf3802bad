//! NFLOG attribute (nlattr-style TLV) handling.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

/// Attribute header (mirrors struct nlattr). The length field includes
/// these four header bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: U16,
    /// Attribute type.
    pub nla_type: U16,
}

impl NlAttr {
    /// Create a new attribute header for a value of `data_len` bytes.
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: U16::new((NLA_HDRLEN + data_len) as u16),
            nla_type: U16::new(attr_type),
        }
    }

    /// Get the value length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.nla_len.get() as usize).saturating_sub(NLA_HDRLEN)
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Iterator over the attribute stream of one message.
///
/// The cursor advances by the 4-byte-aligned attribute size, so the
/// padding between attributes is skipped without being handed out as
/// value bytes. A declared length that overruns the buffer yields an
/// error and exhausts the iterator; the stream cannot be resynchronized
/// past a bad length.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, value bytes).
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        if self.data.len() < NLA_HDRLEN {
            // The kernel pads the final attribute; bare zero padding is a
            // clean end of stream, anything else is a torn header.
            let tail = self.data;
            self.data = &[];
            if tail.iter().all(|&b| b == 0) {
                return None;
            }
            return Some(Err(Error::Truncated {
                expected: NLA_HDRLEN,
                actual: tail.len(),
            }));
        }

        let attr = match NlAttr::from_bytes(self.data) {
            Ok(a) => a,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let len = attr.nla_len.get() as usize;
        if len < NLA_HDRLEN {
            self.data = &[];
            return Some(Err(Error::InvalidAttribute(format!(
                "attribute length {} shorter than header",
                len
            ))));
        }
        if len > self.data.len() {
            let actual = self.data.len();
            self.data = &[];
            return Some(Err(Error::Truncated {
                expected: len,
                actual,
            }));
        }

        let value = &self.data[NLA_HDRLEN..len];
        let aligned_len = nla_align(len);

        // Move to next attribute
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok((attr.nla_type.get(), value)))
    }
}

/// Helper functions for extracting typed values from attribute payloads.
/// NFLOG carries its scalar attributes big-endian.
pub mod get {
    use super::*;

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        if data.is_empty() {
            return Err(Error::InvalidAttribute("empty u8 attribute".into()));
        }
        Ok(data[0])
    }

    /// Extract a u16 value (big endian / network order).
    pub fn u16_be(data: &[u8]) -> Result<u16> {
        if data.len() < 2 {
            return Err(Error::InvalidAttribute("truncated u16 attribute".into()));
        }
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    /// Extract a u32 value (big endian / network order).
    pub fn u32_be(data: &[u8]) -> Result<u32> {
        if data.len() < 4 {
            return Err(Error::InvalidAttribute("truncated u32 attribute".into()));
        }
        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }

    /// Extract a u64 value (big endian / network order).
    pub fn u64_be(data: &[u8]) -> Result<u64> {
        if data.len() < 8 {
            return Err(Error::InvalidAttribute("truncated u64 attribute".into()));
        }
        Ok(u64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]))
    }

    /// Extract a null-terminated string, dropping the terminator.
    pub fn string(data: &[u8]) -> Result<&str> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e)))
    }

    /// Extract bytes (no interpretation).
    pub fn bytes(data: &[u8]) -> &[u8] {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an attribute record with its trailing alignment padding.
    fn attr(attr_type: u16, value: &[u8]) -> Vec<u8> {
        let mut buf = NlAttr::new(attr_type, value.len()).as_bytes().to_vec();
        buf.extend_from_slice(value);
        buf.resize(nla_align(buf.len()), 0);
        buf
    }

    #[test]
    fn align_is_exact_on_multiples_of_four() {
        for n in [0usize, 4, 8, 1024] {
            assert_eq!(nla_align(n), n);
        }
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(nla_align(1), 4);
        assert_eq!(nla_align(2), 4);
        assert_eq!(nla_align(3), 4);
        assert_eq!(nla_align(5), 8);
        assert_eq!(nla_align(9), 12);
    }

    #[test]
    fn align_is_idempotent() {
        for n in 0usize..64 {
            assert_eq!(nla_align(nla_align(n)), nla_align(n));
        }
    }

    #[test]
    fn iter_walks_padded_attributes() {
        // 5-byte value forces 3 bytes of padding before the next record.
        let mut buf = attr(10, b"DROP\0");
        buf.extend_from_slice(&attr(2, &0xDEAD_BEEFu32.to_be_bytes()));

        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], (10, b"DROP\0".as_slice()));
        assert_eq!(attrs[1].0, 2);
        assert_eq!(get::u32_be(attrs[1].1).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn iter_rejects_overrunning_length() {
        // Claims 32 bytes of record but only the header is present.
        let buf = NlAttr::new(9, 28).as_bytes().to_vec();

        let mut iter = AttrIter::new(&buf);
        assert!(matches!(
            iter.next(),
            Some(Err(Error::Truncated {
                expected: 32,
                actual: 4
            }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn iter_rejects_undersized_length() {
        let buf = [2u8, 0, 1, 0]; // nla_len = 2, below the 4-byte header

        let mut iter = AttrIter::new(&buf);
        assert!(matches!(
            iter.next(),
            Some(Err(Error::InvalidAttribute(_)))
        ));
    }

    #[test]
    fn iter_tolerates_trailing_zero_padding() {
        let mut buf = attr(11, &1000u32.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);

        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn iter_rejects_torn_trailing_header() {
        let mut buf = attr(11, &1000u32.to_be_bytes());
        buf.extend_from_slice(&[8, 0]); // length byte of a lost attribute

        let results: Vec<_> = AttrIter::new(&buf).collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Truncated { .. })));
    }

    #[test]
    fn string_strips_nul() {
        assert_eq!(get::string(b"DROP\0").unwrap(), "DROP");
        assert_eq!(get::string(b"DROP").unwrap(), "DROP");
        assert_eq!(get::string(b"\0").unwrap(), "");
    }

    #[test]
    fn scalar_getters_check_width() {
        assert!(get::u32_be(&[1, 2]).is_err());
        assert_eq!(get::u16_be(&[0x12, 0x34]).unwrap(), 0x1234);
        assert_eq!(
            get::u64_be(&[0, 0, 0, 0, 0, 0, 0x30, 0x39]).unwrap(),
            12345
        );
    }
}
