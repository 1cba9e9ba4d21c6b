//! Frame signing and parsing for the notebook message bus (§6): a routing
//! envelope, the literal delimiter `<IDS|MSG>`, an HMAC-SHA256 hex
//! signature of the next four JSON frames, and those frames themselves.
//!
//! Message identity (header/parent_header/metadata/content) is kept as
//! [`serde_json::Value`] at this layer; [`crate::content`] provides typed
//! accessors for the specific message kinds the kernel handles.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::errors::{Error, Result};

pub const DELIMITER: &[u8] = b"<IDS|MSG>";

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies frame sequences using a per-kernel HMAC key, per the
/// connection file's `key` field. A kernel launched with an empty key
/// skips signing entirely (the protocol's own escape hatch for
/// unauthenticated setups).
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(key: &str) -> Self {
        Self { key: key.as_bytes().to_vec() }
    }

    pub fn enabled(&self) -> bool {
        !self.key.is_empty()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts a key of any length")
    }

    pub fn sign(&self, parts: &[&[u8]]) -> String {
        if !self.enabled() {
            return String::new();
        }
        let mut mac = self.mac();
        for part in parts {
            mac.update(part);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, signature: &str, parts: &[&[u8]]) -> bool {
        if !self.enabled() {
            return true;
        }
        let expected = self.sign(parts);
        // Constant-time-ish comparison is unnecessary here: the signature
        // guards against accidental cross-talk between kernels sharing a
        // transport, not an adversarial attacker (§1 non-goals exclude
        // untrusted execution generally).
        expected == signature
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    pub username: String,
    pub date: String,
    pub msg_type: String,
    pub version: String,
}

impl Header {
    pub fn new(msg_type: impl Into<String>, session: &str) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.to_string(),
            username: "kernel".to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            msg_type: msg_type.into(),
            version: "5.3".to_string(),
        }
    }
}

/// One fully parsed/composed message: routing identities plus the four
/// signed JSON frames and any trailing binary buffers.
#[derive(Clone, Debug)]
pub struct Message {
    pub identities: Vec<Vec<u8>>,
    pub header: Header,
    pub parent_header: Value,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Vec<u8>>,
}

impl Message {
    pub fn reply(&self, msg_type: impl Into<String>, content: Value) -> Message {
        Message {
            identities: self.identities.clone(),
            header: Header::new(msg_type, &self.header.session),
            parent_header: serde_json::to_value(&self.header).unwrap_or(Value::Null),
            metadata: serde_json::json!({}),
            content,
            buffers: Vec::new(),
        }
    }

    /// A message the kernel originates itself (e.g. a `status` broadcast)
    /// rather than a reply to an incoming request.
    pub fn new_root(session: &str, msg_type: impl Into<String>, content: Value) -> Message {
        Message {
            identities: Vec::new(),
            header: Header::new(msg_type, session),
            parent_header: Value::Null,
            metadata: serde_json::json!({}),
            content,
            buffers: Vec::new(),
        }
    }

    pub fn content_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.content.clone()).map_err(Error::Json)
    }
}

/// Parse a raw multipart frame sequence received off a ROUTER socket:
/// leading routing identity frames, the `<IDS|MSG>` delimiter, the hex
/// signature, the four JSON frames, then any buffers.
pub fn parse_frames(frames: Vec<Vec<u8>>, signer: &Signer) -> Result<Message> {
    let delim_index = frames
        .iter()
        .position(|f| f.as_slice() == DELIMITER)
        .ok_or_else(|| Error::MalformedFrame("missing <IDS|MSG> delimiter".into()))?;

    let identities = frames[..delim_index].to_vec();
    let rest = &frames[delim_index + 1..];
    if rest.len() < 5 {
        return Err(Error::MalformedFrame("fewer than 4 JSON frames after signature".into()));
    }

    let signature = String::from_utf8_lossy(&rest[0]).to_string();
    let header_raw = &rest[1];
    let parent_raw = &rest[2];
    let metadata_raw = &rest[3];
    let content_raw = &rest[4];
    let buffers = rest[5..].to_vec();

    if !signer.verify(&signature, &[header_raw, parent_raw, metadata_raw, content_raw]) {
        return Err(Error::InvalidSignature);
    }

    let header: Header = serde_json::from_slice(header_raw)?;
    let parent_header: Value = serde_json::from_slice(parent_raw)?;
    let metadata: Value = serde_json::from_slice(metadata_raw)?;
    let content: Value = serde_json::from_slice(content_raw)?;

    Ok(Message { identities, header, parent_header, metadata, content, buffers })
}

/// Serialize a message into the frame sequence a ROUTER/PUB socket sends.
pub fn encode_frames(message: &Message, signer: &Signer) -> Result<Vec<Vec<u8>>> {
    let header = serde_json::to_vec(&message.header)?;
    let parent_header = serde_json::to_vec(&message.parent_header)?;
    let metadata = serde_json::to_vec(&message.metadata)?;
    let content = serde_json::to_vec(&message.content)?;

    let signature = signer.sign(&[&header, &parent_header, &metadata, &content]);

    let mut frames = message.identities.clone();
    frames.push(DELIMITER.to_vec());
    frames.push(signature.into_bytes());
    frames.push(header);
    frames.push(parent_header);
    frames.push(metadata);
    frames.push(content);
    frames.extend(message.buffers.clone());
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames(signer: &Signer) -> Vec<Vec<u8>> {
        let header = br#"{"msg_id":"1","session":"s","username":"u","date":"d","msg_type":"kernel_info_request","version":"5.3"}"#.to_vec();
        let parent = b"{}".to_vec();
        let metadata = b"{}".to_vec();
        let content = b"{}".to_vec();
        let signature = signer.sign(&[&header, &parent, &metadata, &content]);
        vec![b"identity-1".to_vec(), DELIMITER.to_vec(), signature.into_bytes(), header, parent, metadata, content]
    }

    #[test]
    fn round_trips_a_signed_frame_sequence() {
        let signer = Signer::new("secret-key");
        let frames = sample_frames(&signer);
        let message = parse_frames(frames, &signer).unwrap();
        assert_eq!(message.header.msg_type, "kernel_info_request");
        assert_eq!(message.identities, vec![b"identity-1".to_vec()]);
    }

    #[test]
    fn tampered_header_fails_verification() {
        let signer = Signer::new("secret-key");
        let mut frames = sample_frames(&signer);
        // Tamper with the header frame (index 3: identity, delimiter, sig, header).
        frames[3] = br#"{"msg_id":"evil","session":"s","username":"u","date":"d","msg_type":"execute_request","version":"5.3"}"#.to_vec();
        let result = parse_frames(frames, &signer);
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn empty_key_disables_signing() {
        let signer = Signer::new("");
        assert!(!signer.enabled());
        assert_eq!(signer.sign(&[b"x"]), "");
        assert!(signer.verify("anything", &[b"x"]));
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        let signer = Signer::new("k");
        let result = parse_frames(vec![b"only-one-frame".to_vec()], &signer);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn reply_carries_parent_header_and_session() {
        let signer = Signer::new("k");
        let frames = sample_frames(&signer);
        let request = parse_frames(frames, &signer).unwrap();
        let reply = request.reply("kernel_info_reply", serde_json::json!({"status": "ok"}));
        assert_eq!(reply.header.session, request.header.session);
        let parent: Header = serde_json::from_value(reply.parent_header.clone()).unwrap();
        assert_eq!(parent.msg_id, request.header.msg_id);
    }
}
