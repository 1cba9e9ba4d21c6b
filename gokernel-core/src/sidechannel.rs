//! Rich-content side pipe protocol (§6, internal channel between child and
//! kernel): the named-FIFO framing and record types, plus the POSIX FIFO
//! creation helper.
//!
//! Records are encoded with `postcard`: a length-prefixed, self-describing
//! binary codec whose serde-derived schema tolerates the same kind of
//! evolution the target language's native Gob encoding provides, matching
//! §6's requirement for "any equivalent self-describing framed
//! serialization so long as both ends agree".

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::Result;

/// The sentinel MIME key that distinguishes an [`SideChannelRecord::InputRequest`]
/// from a genuine display-data record when both are represented as
/// MIME-map records at the wire level, per §6.
pub const INPUT_REQUEST_MIME: &str = "jupyter/input-request";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DisplayData {
    /// MIME type -> payload, either UTF-8 text or base64-ish raw bytes;
    /// represented as bytes on the wire, decoded to string by consumers
    /// that know the MIME type is textual.
    pub data: HashMap<String, Vec<u8>>,
    pub metadata: HashMap<String, String>,
    pub display_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InputRequest {
    pub prompt: String,
    pub password: bool,
}

/// Declares the program's interest in widget-channel addresses, so the
/// kernel knows which comm traffic to forward over the kernel-to-child
/// widget pipe (§4.8's "the executing program can subscribe to
/// addresses").
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Subscribe {
    pub addresses: Vec<String>,
}

/// Tagged union of the record kinds carried over the rich-content pipe
/// (child -> kernel): display data, an input request, or a widget address
/// subscription.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum SideChannelRecord {
    Display(DisplayData),
    Input(InputRequest),
    Subscribe(Subscribe),
}

impl SideChannelRecord {
    pub fn input_request(prompt: impl Into<String>, password: bool) -> Self {
        SideChannelRecord::Input(InputRequest { prompt: prompt.into(), password })
    }

    pub fn subscribe(addresses: Vec<String>) -> Self {
        SideChannelRecord::Subscribe(Subscribe { addresses })
    }
}

/// One `{address, value}` widget message, delivered kernel -> child over
/// the separate widget pipe ([`crate::workspace::Workspace::widget_fifo_path`]).
/// Reuses this module's framing (4-byte length prefix + postcard body) so
/// both directions speak the same wire shape.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WidgetMessage {
    pub address: String,
    pub value: Vec<u8>,
}

/// Encode one record with a 4-byte little-endian length prefix.
pub fn encode(record: &SideChannelRecord) -> Result<Vec<u8>> {
    let body = postcard::to_stdvec(record).map_err(|e| crate::errors::Error::Workspace(format!("side-channel encode: {e}")))?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Read and decode one framed record from an async reader; returns `Ok(None)`
/// cleanly at EOF.
pub async fn decode_one<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Option<SideChannelRecord>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let record = postcard::from_bytes(&body).map_err(|e| crate::errors::Error::Workspace(format!("side-channel decode: {e}")))?;
    Ok(Some(record))
}

/// Write one framed record to an async writer.
pub async fn write_one<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, record: &SideChannelRecord) -> Result<()> {
    let framed = encode(record)?;
    writer.write_all(&framed).await?;
    Ok(())
}

/// Create a POSIX named pipe at `path`. No-op (returns an error) on
/// non-POSIX platforms — the alternative path is left to the implementer
/// per the spec's explicit non-goal.
#[cfg(unix)]
pub fn make_fifo(path: &Path) -> Result<()> {
    use std::ffi::CString;
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| crate::errors::Error::Workspace(format!("invalid fifo path: {e}")))?;
    // rw-rw---- so only the kernel's own uid/gid can open it.
    let result = unsafe { libc::mkfifo(c_path.as_ptr(), 0o660) };
    if result != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn make_fifo(_path: &Path) -> Result<()> {
    Err(crate::errors::Error::Workspace("named pipes are only supported on POSIX platforms".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_display_record() {
        let mut data = HashMap::new();
        data.insert("text/plain".to_string(), b"hello".to_vec());
        let record = SideChannelRecord::Display(DisplayData { data, metadata: HashMap::new(), display_id: Some("d1".into()) });

        let framed = encode(&record).unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let decoded = decode_one(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[tokio::test]
    async fn round_trips_input_request() {
        let record = SideChannelRecord::input_request("password?", true);
        let framed = encode(&record).unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let decoded = decode_one(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[tokio::test]
    async fn decode_returns_none_at_eof() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(decode_one(&mut cursor).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn make_fifo_creates_a_real_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pipe");
        make_fifo(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(meta.file_type().is_fifo());
    }
}
