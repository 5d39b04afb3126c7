//! OpenFlow wire codec: the common header and the handshake message family
//! (Hello, Echo, FeaturesRequest/Reply, Error) for protocol versions 1.3 and 1.5.
//!
//! Everything here is a pure transform over byte slices; no I/O, no state.

pub mod error;
pub mod header;
pub mod message;
pub mod types;

pub use error::CodecError;
pub use header::Header;
pub use message::{
    EchoReply, EchoRequest, ErrorMsg, FeaturesReply, FeaturesRequest, Hello, HelloElement, Message,
    OfpMessage,
};
pub use types::{MsgType, Version, Xid, OFP_HEADER_SIZE, OFP_MAX_HANDSHAKE_SIZE, OFP_XID_WRAP};

macro_rules! versioned_constructors {
    ($(#[$doc:meta])* $module:ident, $version:expr) => {
        $(#[$doc])*
        pub mod $module {
            use super::*;

            pub const VERSION: Version = $version;

            pub fn hello(xid: Xid) -> Hello {
                Hello::new(VERSION, xid)
            }

            pub fn echo_request(xid: Xid) -> EchoRequest {
                EchoRequest::new(VERSION, xid)
            }

            pub fn echo_reply(xid: Xid) -> EchoReply {
                EchoReply::new(VERSION, xid)
            }

            pub fn features_request(xid: Xid) -> FeaturesRequest {
                FeaturesRequest::new(VERSION, xid)
            }

            pub fn features_reply(xid: Xid, dpid: u64) -> FeaturesReply {
                FeaturesReply::new(VERSION, xid, dpid)
            }

            pub fn error_msg(xid: Xid, err_type: u16, code: u16, data: u8) -> ErrorMsg {
                ErrorMsg::new(VERSION, xid, err_type, code, data)
            }
        }
    };
}

versioned_constructors!(
    /// Constructors pinned to OpenFlow 1.3 (wire version 0x04).
    v13,
    Version::V13
);
versioned_constructors!(
    /// Constructors pinned to OpenFlow 1.5 (wire version 0x06).
    v15,
    Version::V15
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_constructors_fix_version_byte() {
        assert_eq!(v13::hello(1).encode()[0], 0x04);
        assert_eq!(v15::hello(1).encode()[0], 0x06);
        assert_eq!(v13::echo_request(7).header.msg_type(), MsgType::EchoRequest);
        assert_eq!(v15::features_reply(7, 1).header.version, 0x06);
        assert_eq!(v15::error_msg(0, 1, 2, 0).encode().len(), ErrorMsg::SIZE);
    }

    #[test]
    fn one_decode_path_serves_both_versions() {
        let a = FeaturesReply::decode(&v13::features_reply(5, 77).encode()).unwrap();
        let b = FeaturesReply::decode(&v15::features_reply(5, 77).encode()).unwrap();
        assert_eq!(a.dpid, b.dpid);
        assert_eq!(Version::from_wire(a.header.version), Some(Version::V13));
        assert_eq!(Version::from_wire(b.header.version), Some(Version::V15));
    }
}
