use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio_util::codec::{Decoder, LengthDelimitedCodec};

use crate::ofp::OFP_HEADER_SIZE;

/// How a connection's byte stream is split into frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Each socket read is exactly one message. Matches switches that write one
    /// message per segment; anything coalesced or split by TCP is misparsed.
    #[default]
    SingleRead,
    /// Reassemble frames from the header length field across reads.
    Stream,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::SingleRead => f.write_str("single-read"),
            Framing::Stream => f.write_str("stream"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-read" | "single" => Ok(Framing::SingleRead),
            "stream" => Ok(Framing::Stream),
            other => Err(format!("unknown framing '{}'", other)),
        }
    }
}

/// Length-prefixed OpenFlow framing on top of `LengthDelimitedCodec`.
///
/// The length field sits at offset 2 and already counts the whole message,
/// header included. Nothing is skipped and no adjustment is applied, so each
/// yielded frame starts at the version byte and is exactly `length` bytes.
#[derive(Debug)]
pub struct OfpFrameCodec {
    inner: LengthDelimitedCodec,
}

impl OfpFrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_offset(2)
                .length_field_length(2)
                .length_adjustment(0)
                .num_skip(0)
                .max_frame_length(u16::MAX as usize)
                .big_endian()
                .new_codec(),
        }
    }
}

impl Default for OfpFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OfpFrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(buf) if buf.len() < OFP_HEADER_SIZE => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes is shorter than a header", buf.len()),
            )),
            Some(buf) => Ok(Some(buf.freeze())),
            None => Ok(None),
        }
    }
}
