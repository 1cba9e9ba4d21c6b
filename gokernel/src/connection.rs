//! Parses the notebook front-end's connection file: transport, ports for
//! the five channels, and the HMAC signing key.

use std::path::Path;

use serde::Deserialize;

use crate::errors::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionInfo {
    pub ip: String,
    pub transport: String,
    pub signature_scheme: String,
    pub key: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
}

impl ConnectionInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let info: ConnectionInfo = serde_json::from_str(&text)?;
        if info.signature_scheme != "hmac-sha256" {
            return Err(Error::Connection(format!(
                "unsupported signature scheme: {}",
                info.signature_scheme
            )));
        }
        Ok(info)
    }

    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_signature_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.json");
        std::fs::write(
            &path,
            r#"{"ip":"127.0.0.1","transport":"tcp","signature_scheme":"hmac-sha1","key":"k",
               "shell_port":1,"iopub_port":2,"stdin_port":3,"control_port":4,"hb_port":5}"#,
        )
        .unwrap();
        assert!(ConnectionInfo::load(&path).is_err());
    }

    #[test]
    fn builds_tcp_endpoint() {
        let info = ConnectionInfo {
            ip: "127.0.0.1".into(),
            transport: "tcp".into(),
            signature_scheme: "hmac-sha256".into(),
            key: "k".into(),
            shell_port: 5555,
            iopub_port: 0,
            stdin_port: 0,
            control_port: 0,
            hb_port: 0,
        };
        assert_eq!(info.endpoint(5555), "tcp://127.0.0.1:5555");
    }
}
