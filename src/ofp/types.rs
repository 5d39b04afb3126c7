use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the fixed OpenFlow header present on every message.
pub const OFP_HEADER_SIZE: usize = 8;

/// Largest handshake-class message (FeaturesReply). Read buffers are sized to this.
pub const OFP_MAX_HANDSHAKE_SIZE: usize = 32;

/// Locally assigned xids wrap at this bound.
pub const OFP_XID_WRAP: u32 = 0xffff_ff00;

/// Transaction id carried in every header. Replies reuse the request's xid.
pub type Xid = u32;

/// Protocol versions the controller can speak.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Version {
    V13,
    V15,
}

impl Version {
    pub const ALL: [Version; 2] = [Version::V13, Version::V15];

    /// Version byte as it appears on the wire.
    pub const fn wire(self) -> u8 {
        match self {
            Version::V13 => 0x04,
            Version::V15 => 0x06,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Version> {
        match byte {
            0x04 => Some(Version::V13),
            0x06 => Some(Version::V15),
            _ => None,
        }
    }

    /// Hello bitmap advertising this version.
    pub const fn bitmap(self) -> u32 {
        1 << self.wire()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::V13 => f.write_str("1.3"),
            Version::V15 => f.write_str("1.5"),
        }
    }
}

impl FromStr for Version {
    type Err = String;

    /// Accepts the release name (`1.3`, `13`) or the wire byte (`4`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.3" | "13" | "4" | "0x04" => Ok(Version::V13),
            "1.5" | "15" | "6" | "0x06" => Ok(Version::V15),
            other => Err(format!("unsupported OpenFlow version '{}'", other)),
        }
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

/// OpenFlow message type codes shared by 1.3 and 1.5.
///
/// Only the handshake family has payload codecs; everything else is carried
/// as `Other` so the header still round-trips.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    Experimenter,
    FeaturesRequest,
    FeaturesReply,
    Other(u8),
}

impl MsgType {
    pub const fn code(self) -> u8 {
        match self {
            MsgType::Hello => 0,
            MsgType::Error => 1,
            MsgType::EchoRequest => 2,
            MsgType::EchoReply => 3,
            MsgType::Experimenter => 4,
            MsgType::FeaturesRequest => 5,
            MsgType::FeaturesReply => 6,
            MsgType::Other(c) => c,
        }
    }

    /// Type of the reply the controller waits for after sending `self`.
    pub const fn expected_reply(self) -> MsgType {
        match self {
            MsgType::Hello => MsgType::Hello,
            MsgType::EchoRequest => MsgType::EchoReply,
            MsgType::FeaturesRequest => MsgType::FeaturesReply,
            other => other,
        }
    }
}

impl From<u8> for MsgType {
    fn from(code: u8) -> Self {
        match code {
            0 => MsgType::Hello,
            1 => MsgType::Error,
            2 => MsgType::EchoRequest,
            3 => MsgType::EchoReply,
            4 => MsgType::Experimenter,
            5 => MsgType::FeaturesRequest,
            6 => MsgType::FeaturesReply,
            c => MsgType::Other(c),
        }
    }
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> u8 {
        t.code()
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgType::Hello => f.write_str("Hello"),
            MsgType::Error => f.write_str("Error"),
            MsgType::EchoRequest => f.write_str("EchoRequest"),
            MsgType::EchoReply => f.write_str("EchoReply"),
            MsgType::Experimenter => f.write_str("Experimenter"),
            MsgType::FeaturesRequest => f.write_str("FeaturesRequest"),
            MsgType::FeaturesReply => f.write_str("FeaturesReply"),
            MsgType::Other(c) => write!(f, "Type({})", c),
        }
    }
}
