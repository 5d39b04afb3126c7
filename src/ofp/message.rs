use bytes::{Buf, BufMut};

use crate::ofp::error::CodecError;
use crate::ofp::header::Header;
use crate::ofp::types::{MsgType, Version, Xid, OFP_HEADER_SIZE};

/// OpenFlow Message
///
/// Byte-level API shared by every handshake-class message. The payload layouts
/// are identical in 1.3 and 1.5, so one implementation serves both versions;
/// only the version byte in the header differs.
pub trait OfpMessage: Sized {
    const NAME: &'static str;
    const TYPE: MsgType;
    /// Smallest valid encoding, header included.
    const MIN_SIZE: usize;

    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> &mut Header;

    /// Exact encoded size of this message.
    fn size(&self) -> usize;

    fn encode_body(&self, out: &mut Vec<u8>);

    /// Build the message from its header and the bytes between the header and
    /// the declared length.
    fn decode_body(header: Header, body: &[u8]) -> Result<Self, CodecError>;

    fn xid(&self) -> Xid {
        self.header().xid
    }

    fn set_xid(&mut self, xid: Xid) {
        self.header_mut().xid = xid;
    }

    fn msg_type(&self) -> MsgType {
        Self::TYPE
    }

    /// Marshal header and payload. The length field always equals the output size.
    fn encode(&self) -> Vec<u8> {
        let size = self.size();
        let mut header = *self.header();
        header.typ = Self::TYPE.code();
        header.length = size as u16;

        let mut out = Vec::with_capacity(size);
        header.encode_into(&mut out);
        self.encode_body(&mut out);
        debug_assert_eq!(out.len(), size);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::MIN_SIZE {
            return Err(CodecError::short(Self::NAME, Self::MIN_SIZE, data.len()));
        }
        let header = Header::decode(data)?;
        if header.msg_type() != Self::TYPE {
            return Err(CodecError::malformed(
                Self::NAME,
                "type",
                format!("expected {}, found {}", Self::TYPE, header.msg_type()),
            ));
        }
        let declared = header.length();
        if declared < Self::MIN_SIZE {
            return Err(CodecError::malformed(
                Self::NAME,
                "length",
                format!("declared {} below minimum {}", declared, Self::MIN_SIZE),
            ));
        }
        if declared > data.len() {
            return Err(CodecError::malformed(
                Self::NAME,
                "length",
                format!("declared {} exceeds buffer of {}", declared, data.len()),
            ));
        }
        Self::decode_body(header, &data[OFP_HEADER_SIZE..declared])
    }
}

macro_rules! header_only_message {
    ($(#[$doc:meta])* $name:ident, $typ:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub header: Header,
        }

        impl $name {
            pub fn new(version: Version, xid: Xid) -> Self {
                $name {
                    header: Header::new(version.wire(), $typ, OFP_HEADER_SIZE as u16, xid),
                }
            }
        }

        impl OfpMessage for $name {
            const NAME: &'static str = $label;
            const TYPE: MsgType = $typ;
            const MIN_SIZE: usize = OFP_HEADER_SIZE;

            fn header(&self) -> &Header {
                &self.header
            }

            fn header_mut(&mut self) -> &mut Header {
                &mut self.header
            }

            fn size(&self) -> usize {
                OFP_HEADER_SIZE
            }

            fn encode_body(&self, _out: &mut Vec<u8>) {}

            fn decode_body(header: Header, _body: &[u8]) -> Result<Self, CodecError> {
                Ok($name { header })
            }
        }
    };
}

header_only_message!(
    /// Liveness check. The peer must answer with an `EchoReply` carrying the same xid.
    EchoRequest,
    MsgType::EchoRequest,
    "EchoRequest"
);
header_only_message!(EchoReply, MsgType::EchoReply, "EchoReply");
header_only_message!(
    /// Asks the switch for its datapath id and capabilities.
    FeaturesRequest,
    MsgType::FeaturesRequest,
    "FeaturesRequest"
);

pub const HELLO_ELEM_VERSIONBITMAP: u16 = 1;
const HELLO_ELEMENT_SIZE: usize = 8;

/// Version-bitmap element carried by Hello. Bit N set means wire version N is supported.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HelloElement {
    pub typ: u16,
    pub length: u16,
    pub bitmap: u32,
}

impl HelloElement {
    pub fn bitmap(bitmap: u32) -> Self {
        HelloElement {
            typ: HELLO_ELEM_VERSIONBITMAP,
            length: HELLO_ELEMENT_SIZE as u16,
            bitmap,
        }
    }

    /// Whether the element advertises the given version.
    pub fn supports(&self, version: Version) -> bool {
        self.bitmap & version.bitmap() != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub header: Header,
    /// A bare 8-byte Hello is legal and carries no element.
    pub element: Option<HelloElement>,
}

impl Hello {
    pub fn new(version: Version, xid: Xid) -> Self {
        let mut hello = Hello {
            header: Header::new(version.wire(), MsgType::Hello, 0, xid),
            element: Some(HelloElement::bitmap(version.bitmap())),
        };
        hello.header.length = hello.size() as u16;
        hello
    }
}

impl OfpMessage for Hello {
    const NAME: &'static str = "Hello";
    const TYPE: MsgType = MsgType::Hello;
    const MIN_SIZE: usize = OFP_HEADER_SIZE;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        OFP_HEADER_SIZE + self.element.map_or(0, |_| HELLO_ELEMENT_SIZE)
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        if let Some(e) = self.element {
            out.put_u16(e.typ);
            out.put_u16(HELLO_ELEMENT_SIZE as u16);
            out.put_u32(e.bitmap);
        }
    }

    // Only the first element is parsed; anything after it is ignored.
    fn decode_body(header: Header, mut body: &[u8]) -> Result<Self, CodecError> {
        if body.is_empty() {
            return Ok(Hello { header, element: None });
        }
        if body.len() < HELLO_ELEMENT_SIZE {
            return Err(CodecError::malformed(
                Self::NAME,
                "element",
                format!("{} trailing bytes cannot hold an element", body.len()),
            ));
        }
        let typ = body.get_u16();
        let length = body.get_u16();
        let bitmap = body.get_u32();
        if typ != HELLO_ELEM_VERSIONBITMAP {
            return Err(CodecError::malformed(
                Self::NAME,
                "element.type",
                format!("unsupported element type {}", typ),
            ));
        }
        if (length as usize) < HELLO_ELEMENT_SIZE {
            return Err(CodecError::malformed(
                Self::NAME,
                "element.length",
                format!("element length {} below {}", length, HELLO_ELEMENT_SIZE),
            ));
        }
        Ok(Hello {
            header,
            element: Some(HelloElement { typ, length, bitmap }),
        })
    }
}

/// Switch features, the payload that completes the handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FeaturesReply {
    pub header: Header,
    pub dpid: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub aux_id: u8,
    pub pad: u16,
    pub capabilities: u32,
    pub reserved: u32,
}

impl FeaturesReply {
    pub const SIZE: usize = 32;

    pub fn new(version: Version, xid: Xid, dpid: u64) -> Self {
        FeaturesReply {
            header: Header::new(version.wire(), MsgType::FeaturesReply, Self::SIZE as u16, xid),
            dpid,
            n_buffers: 0,
            n_tables: 0,
            aux_id: 0,
            pad: 0,
            capabilities: 0,
            reserved: 0,
        }
    }
}

impl OfpMessage for FeaturesReply {
    const NAME: &'static str = "FeaturesReply";
    const TYPE: MsgType = MsgType::FeaturesReply;
    const MIN_SIZE: usize = Self::SIZE;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        Self::SIZE
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.put_u64(self.dpid);
        out.put_u32(self.n_buffers);
        out.put_u8(self.n_tables);
        out.put_u8(self.aux_id);
        out.put_u16(self.pad);
        out.put_u32(self.capabilities);
        out.put_u32(self.reserved);
    }

    fn decode_body(header: Header, mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(FeaturesReply {
            header,
            dpid: body.get_u64(),
            n_buffers: body.get_u32(),
            n_tables: body.get_u8(),
            aux_id: body.get_u8(),
            pad: body.get_u16(),
            capabilities: body.get_u32(),
            reserved: body.get_u32(),
        })
    }
}

/// Error message (datapath -> controller).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub header: Header,
    pub err_type: u16,
    pub code: u16,
    pub data: u8,
}

impl ErrorMsg {
    pub const SIZE: usize = 13;

    pub fn new(version: Version, xid: Xid, err_type: u16, code: u16, data: u8) -> Self {
        ErrorMsg {
            header: Header::new(version.wire(), MsgType::Error, Self::SIZE as u16, xid),
            err_type,
            code,
            data,
        }
    }
}

impl OfpMessage for ErrorMsg {
    const NAME: &'static str = "ErrorMsg";
    const TYPE: MsgType = MsgType::Error;
    const MIN_SIZE: usize = Self::SIZE;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        Self::SIZE
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.put_u16(self.err_type);
        out.put_u16(self.code);
        out.put_u8(self.data);
    }

    fn decode_body(header: Header, mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(ErrorMsg {
            header,
            err_type: body.get_u16(),
            code: body.get_u16(),
            data: body.get_u8(),
        })
    }
}

/// Version-agnostic view over any frame the controller may receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Error(ErrorMsg),
    EchoRequest(EchoRequest),
    EchoReply(EchoReply),
    FeaturesRequest(FeaturesRequest),
    FeaturesReply(FeaturesReply),
    /// A type without a payload codec; the body is kept verbatim.
    Unparsed { header: Header, body: Vec<u8> },
}

impl Message {
    /// Decode a frame, branching on the header type.
    pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
        let header = Header::decode(data)?;
        let msg = match header.msg_type() {
            MsgType::Hello => Message::Hello(Hello::decode(data)?),
            MsgType::Error => Message::Error(ErrorMsg::decode(data)?),
            MsgType::EchoRequest => Message::EchoRequest(EchoRequest::decode(data)?),
            MsgType::EchoReply => Message::EchoReply(EchoReply::decode(data)?),
            MsgType::FeaturesRequest => Message::FeaturesRequest(FeaturesRequest::decode(data)?),
            MsgType::FeaturesReply => Message::FeaturesReply(FeaturesReply::decode(data)?),
            MsgType::Experimenter | MsgType::Other(_) => {
                let end = header.length().clamp(OFP_HEADER_SIZE, data.len());
                Message::Unparsed {
                    header,
                    body: data[OFP_HEADER_SIZE..end].to_vec(),
                }
            }
        };
        Ok(msg)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Hello(m) => m.encode(),
            Message::Error(m) => m.encode(),
            Message::EchoRequest(m) => m.encode(),
            Message::EchoReply(m) => m.encode(),
            Message::FeaturesRequest(m) => m.encode(),
            Message::FeaturesReply(m) => m.encode(),
            Message::Unparsed { header, body } => {
                let mut h = *header;
                h.length = (OFP_HEADER_SIZE + body.len()) as u16;
                let mut out = h.encode();
                out.extend_from_slice(body);
                out
            }
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Hello(m) => &m.header,
            Message::Error(m) => &m.header,
            Message::EchoRequest(m) => &m.header,
            Message::EchoReply(m) => &m.header,
            Message::FeaturesRequest(m) => &m.header,
            Message::FeaturesReply(m) => &m.header,
            Message::Unparsed { header, .. } => header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_length_matches(bytes: &[u8]) {
        let h = Header::decode(bytes).unwrap();
        assert_eq!(h.length(), bytes.len());
    }

    #[test]
    fn hello_v13_matches_reference_bytes() {
        let hello = Hello::new(Version::V13, 0);
        let expected = vec![0x04, 0, 0, 16, 0, 0, 0, 0, 0, 1, 0, 8, 0, 0, 0, 1 << 4];
        assert_eq!(hello.size(), 16);
        assert_eq!(hello.encode(), expected);
        assert_eq!(Hello::decode(&expected).unwrap(), hello);
    }

    #[test]
    fn header_only_messages_v15() {
        assert_eq!(EchoRequest::new(Version::V15, 0).encode(), vec![0x06, 2, 0, 8, 0, 0, 0, 0]);
        assert_eq!(EchoReply::new(Version::V15, 0).encode(), vec![0x06, 3, 0, 8, 0, 0, 0, 0]);
        assert_eq!(FeaturesRequest::new(Version::V15, 0).encode(), vec![0x06, 5, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn error_msg_matches_reference_bytes() {
        let msg = ErrorMsg::new(Version::V15, 0, 1, 2, 0);
        let data = vec![0x06, 1, 0, 13, 0, 0, 0, 0, 0, 1, 0, 2, 0];
        assert_eq!(msg.encode(), data);
        assert_eq!(ErrorMsg::decode(&data).unwrap(), msg);
    }

    #[test]
    fn features_reply_round_trips_all_fields() {
        for version in Version::ALL {
            let reply = FeaturesReply {
                n_buffers: 256,
                n_tables: 254,
                aux_id: 1,
                pad: 0,
                capabilities: 0x4f,
                reserved: 0xffff_ffff,
                ..FeaturesReply::new(version, 0x0a0b_0c0d, 0x0102_0304_0506_0708)
            };
            let bytes = reply.encode();
            assert_eq!(bytes.len(), FeaturesReply::SIZE);
            assert_eq!(&bytes[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(bytes[20], 254);
            assert_eq!(bytes[21], 1);
            assert_eq!(FeaturesReply::decode(&bytes).unwrap(), reply);
        }
    }

    #[test]
    fn length_field_equals_encoded_size() {
        for v in Version::ALL {
            assert_length_matches(&Hello::new(v, 9).encode());
            assert_length_matches(&EchoRequest::new(v, 9).encode());
            assert_length_matches(&EchoReply::new(v, 9).encode());
            assert_length_matches(&FeaturesRequest::new(v, 9).encode());
            assert_length_matches(&FeaturesReply::new(v, 9, 42).encode());
            assert_length_matches(&ErrorMsg::new(v, 9, 1, 1, 7).encode());
        }
    }

    #[test]
    fn encode_repairs_stale_length() {
        let mut msg = FeaturesReply::new(Version::V13, 1, 5);
        msg.header.length = 3;
        assert_length_matches(&msg.encode());
    }

    #[test]
    fn short_buffers_fail_without_panicking() {
        let full = FeaturesReply::new(Version::V13, 1, 7).encode();
        for n in 0..FeaturesReply::SIZE {
            match FeaturesReply::decode(&full[..n]) {
                Err(CodecError::ShortBuffer { needed, got, .. }) => {
                    assert_eq!(needed, FeaturesReply::SIZE);
                    assert_eq!(got, n);
                }
                other => panic!("expected ShortBuffer for {} bytes, got {:?}", n, other),
            }
        }
        let err = ErrorMsg::new(Version::V13, 1, 1, 1, 1).encode();
        for n in 0..ErrorMsg::SIZE {
            assert!(matches!(ErrorMsg::decode(&err[..n]), Err(CodecError::ShortBuffer { .. })));
        }
        for n in 0..OFP_HEADER_SIZE {
            assert!(matches!(Hello::decode(&[0u8; 16][..n]), Err(CodecError::ShortBuffer { .. })));
            assert!(matches!(Message::decode(&[0u8; 16][..n]), Err(CodecError::ShortBuffer { .. })));
        }
    }

    #[test]
    fn wrong_type_is_malformed() {
        let bytes = EchoRequest::new(Version::V13, 3).encode();
        assert!(matches!(
            EchoReply::decode(&bytes),
            Err(CodecError::MalformedField { field: "type", .. })
        ));
    }

    #[test]
    fn inconsistent_length_is_malformed() {
        let mut bytes = FeaturesReply::new(Version::V13, 3, 1).encode();
        bytes[3] = 40;
        assert!(matches!(
            FeaturesReply::decode(&bytes),
            Err(CodecError::MalformedField { field: "length", .. })
        ));
        bytes[3] = 16;
        assert!(matches!(
            FeaturesReply::decode(&bytes),
            Err(CodecError::MalformedField { field: "length", .. })
        ));
    }

    #[test]
    fn hello_element_validation() {
        let bare = Header::new(0x04, MsgType::Hello, 8, 0).encode();
        assert_eq!(Hello::decode(&bare).unwrap().element, None);

        let mut bytes = Hello::new(Version::V15, 0).encode();
        let parsed = Hello::decode(&bytes).unwrap();
        assert!(parsed.element.unwrap().supports(Version::V15));
        assert!(!parsed.element.unwrap().supports(Version::V13));

        bytes[9] = 2;
        assert!(matches!(
            Hello::decode(&bytes),
            Err(CodecError::MalformedField { field: "element.type", .. })
        ));

        let truncated = [0x04, 0, 0, 12, 0, 0, 0, 0, 0, 1, 0, 8];
        assert!(matches!(
            Hello::decode(&truncated),
            Err(CodecError::MalformedField { field: "element", .. })
        ));
    }

    #[test]
    fn message_dispatches_on_type() {
        let bytes = FeaturesReply::new(Version::V15, 2, 99).encode();
        match Message::decode(&bytes).unwrap() {
            Message::FeaturesReply(r) => assert_eq!(r.dpid, 99),
            other => panic!("unexpected {:?}", other),
        }

        let unknown = vec![0x04, 14, 0, 10, 0, 0, 0, 1, 0xaa, 0xbb];
        let msg = Message::decode(&unknown).unwrap();
        assert_eq!(msg.header().msg_type(), MsgType::Other(14));
        assert_eq!(msg.encode(), unknown);
    }
}
