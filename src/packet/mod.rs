//! Line-framed JSON packets multiplexed over a pty byte stream.
//!
//! Wire shape, one packet per line:
//!
//! ```text
//! ##14{"hello":true}
//! ##N{"streaming":"size unknown"}
//! ```

pub mod framer;

pub use framer::PacketFramer;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Two-byte marker every packet line starts with.
pub const PACKET_MARKER: &[u8] = b"##";

/// Size tag that disables the length check.
pub const STREAMING_SIZE_TAG: &str = "N";

/// The size tag between the marker and the json body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeTag {
    Streaming,
    Declared(usize),
    /// Neither `N` nor a number. Kept so the mismatch can be reported.
    Invalid(String),
}

impl SizeTag {
    fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        if text == STREAMING_SIZE_TAG {
            return SizeTag::Streaming;
        }
        match text.parse::<usize>() {
            Ok(n) => SizeTag::Declared(n),
            Err(_) => SizeTag::Invalid(text.into_owned()),
        }
    }

    /// Whether a body of `len` bytes satisfies this tag.
    pub fn matches(&self, len: usize) -> bool {
        match self {
            SizeTag::Streaming => true,
            SizeTag::Declared(n) => *n == len,
            SizeTag::Invalid(_) => false,
        }
    }
}

/// A decoded packet line.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub size_tag: SizeTag,
    pub body: serde_json::Value,
}

impl Packet {
    /// The `type` discriminator of the body, if it has one.
    pub fn packet_type(&self) -> Option<&str> {
        self.body.get("type").and_then(|t| t.as_str())
    }

    /// Deserialize the body into a concrete payload type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// Parse one line (newline already stripped) into a packet.
///
/// A size mismatch is only logged; the body is still parsed.
pub fn parse_line(line: &[u8]) -> Result<Packet, FrameError> {
    if !line.starts_with(PACKET_MARKER) {
        return Err(FrameError::MissingMarker);
    }
    let rest = &line[PACKET_MARKER.len()..];
    let brace = rest
        .iter()
        .position(|&b| b == b'{')
        .ok_or(FrameError::MissingBody)?;
    let size_tag = SizeTag::parse(&rest[..brace]);
    let body = &rest[brace..];

    if !size_tag.matches(body.len()) {
        log::warn!(
            "packet size mismatch: tag {:?}, body is {} bytes",
            size_tag,
            body.len()
        );
    }

    let body = serde_json::from_slice(body)?;
    Ok(Packet { size_tag, body })
}

/// Frame a value as `\n##<len>{json}\n`.
///
/// The leading newline terminates any partial raw output the peer may have
/// written before the packet.
pub fn encode_packet<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let header = format!("\n##{}", json.len());
    let mut out = Vec::with_capacity(header.len() + json.len() + 1);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&json);
    out.push(b'\n');
    Ok(out)
}

/// Pty data embedded in a packet body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    #[serde(alias = "ptypos")]
    pub position: u64,
    /// Raw text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Base64 payload, used for binary output.
    #[serde(default, alias = "ptydata64", skip_serializing_if = "Option::is_none")]
    pub data64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respid: Option<String>,
}

impl DataPacket {
    /// The payload bytes, preferring the base64 field when both are set.
    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        if let Some(encoded) = &self.data64 {
            return BASE64_STANDARD.decode(encoded);
        }
        Ok(self.data.as_deref().unwrap_or_default().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_declared_size() {
        let pk = parse_line(br#"##14{"hello":true}"#).unwrap();
        assert_eq!(pk.size_tag, SizeTag::Declared(14));
        assert_eq!(pk.body, json!({"hello": true}));
    }

    #[test]
    fn test_parse_streaming_tag() {
        let pk = parse_line(br#"##N{"type":"data"}"#).unwrap();
        assert_eq!(pk.size_tag, SizeTag::Streaming);
        assert_eq!(pk.packet_type(), Some("data"));
    }

    #[test]
    fn test_size_mismatch_still_parses() {
        let pk = parse_line(br#"##99{"a":1}"#).unwrap();
        assert_eq!(pk.size_tag, SizeTag::Declared(99));
        assert!(!pk.size_tag.matches(7));
        assert_eq!(pk.body, json!({"a": 1}));
    }

    #[test]
    fn test_invalid_lines() {
        assert!(matches!(parse_line(b"plain output"), Err(FrameError::MissingMarker)));
        assert!(matches!(parse_line(b"##12"), Err(FrameError::MissingBody)));
        assert!(matches!(parse_line(b"##5{bad}"), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_encode_packet_frames_body() {
        let out = encode_packet(&json!({"hello": true})).unwrap();
        assert_eq!(out, b"\n##14{\"hello\":true}\n".to_vec());
        let line = &out[1..out.len() - 1];
        let pk = parse_line(line).unwrap();
        assert!(pk.size_tag.matches(14));
    }

    #[test]
    fn test_data_packet_payloads() {
        let pk = parse_line(br#"##N{"ptypos":12,"ptydata64":"aGk="}"#).unwrap();
        let data: DataPacket = pk.decode().unwrap();
        assert_eq!(data.position, 12);
        assert_eq!(data.payload().unwrap(), b"hi");

        let raw: DataPacket =
            serde_json::from_value(json!({"position": 3, "data": "abc", "respid": "r1"})).unwrap();
        assert_eq!(raw.payload().unwrap(), b"abc");
        assert_eq!(raw.respid.as_deref(), Some("r1"));
    }
}
