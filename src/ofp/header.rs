use bytes::{Buf, BufMut};

use crate::ofp::error::CodecError;
use crate::ofp::types::{MsgType, Xid, OFP_HEADER_SIZE};

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// Decoding is version-blind: any version byte produces a header, and it is up
/// to the caller to decide whether the version is acceptable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub typ: u8,
    /// Total encoded size of the message, header included.
    pub length: u16,
    pub xid: Xid,
}

impl Header {
    pub fn new(version: u8, typ: MsgType, length: u16, xid: Xid) -> Header {
        Header {
            version,
            typ: typ.code(),
            length,
            xid,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        MsgType::from(self.typ)
    }

    pub fn length(&self) -> usize {
        self.length as usize
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.typ);
        buf.put_u16(self.length);
        buf.put_u32(self.xid);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OFP_HEADER_SIZE);
        self.encode_into(&mut out);
        out
    }

    /// Parse the first eight bytes of `data`. Trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Header, CodecError> {
        if data.len() < OFP_HEADER_SIZE {
            return Err(CodecError::short("header", OFP_HEADER_SIZE, data.len()));
        }
        let mut buf = &data[..OFP_HEADER_SIZE];
        Ok(Header {
            version: buf.get_u8(),
            typ: buf.get_u8(),
            length: buf.get_u16(),
            xid: buf.get_u32(),
        })
    }
}
