//! Language-server supervisor (C6): starts/stops the external language
//! server over stdio, tracks file versions, and exposes best-effort
//! `definition`/`complete` operations.
//!
//! The child is driven with `tokio::process::Command` the same way the
//! notebook runner drives `cargo build` in its watcher — piped stdio,
//! line/frame reading on a dedicated task, state bridged back through a
//! channel — generalized from "one-shot build" to "long-lived JSON-RPC
//! peer" using the LSP wire framing (`Content-Length` headers over stdio).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LspState {
    Stopped,
    Starting,
    Running,
    Draining,
}

struct FileRecord {
    content: String,
    version: i64,
    modified: Instant,
}

struct Inner {
    state: LspState,
    child: Option<Child>,
    stdin: Option<tokio::process::ChildStdin>,
    next_request_id: i64,
    pending: HashMap<i64, oneshot::Sender<Value>>,
    files: HashMap<PathBuf, FileRecord>,
    /// Bounded queue of server-initiated diagnostics/log messages,
    /// consumable alongside the next request's result.
    messages: VecDeque<Value>,
}

const MAX_QUEUED_MESSAGES: usize = 256;

/// Supervises the external language server's lifecycle and exposes
/// `definition`/`complete` as best-effort, timeout-bounded operations.
pub struct LanguageServerSupervisor {
    inner: Arc<Mutex<Inner>>,
    outbound_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    config: Config,
    binary: String,
}

impl LanguageServerSupervisor {
    pub fn new(config: Config) -> Self {
        let binary = config.lsp_binary.clone();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: LspState::Stopped,
                child: None,
                stdin: None,
                next_request_id: 1,
                pending: HashMap::new(),
                files: HashMap::new(),
                messages: VecDeque::new(),
            })),
            outbound_tx: None,
            config,
            binary,
        }
    }

    pub fn state(&self) -> LspState {
        self.inner.lock().state
    }

    /// Launch the server binary, in its own process group so front-end
    /// interrupt signals never reach it, and wait (bounded by
    /// `lsp_start_timeout`) for the stdio pipes to be ready.
    pub async fn start(&mut self, workspace_root: &Path) -> bool {
        {
            let mut guard = self.inner.lock();
            if guard.state != LspState::Stopped {
                return guard.state == LspState::Running;
            }
            guard.state = LspState::Starting;
        }

        let mut command = Command::new(&self.binary);
        command.current_dir(workspace_root).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let spawn_result =
            tokio::time::timeout(self.config.lsp_start_timeout, async { command.spawn() }).await;

        let mut child = match spawn_result {
            Ok(Ok(child)) => child,
            _ => {
                self.inner.lock().state = LspState::Stopped;
                return false;
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(mut stdin) = stdin {
            tokio::spawn(async move {
                while let Some(bytes) = outbound_rx.recv().await {
                    if stdin.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stdout) = stdout {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                read_loop(stdout, inner).await;
            });
        }

        self.inner.lock().child = Some(child);
        self.outbound_tx = Some(outbound_tx);
        self.inner.lock().state = LspState::Running;
        self.connect(workspace_root).await
    }

    /// Perform the language-protocol initialization handshake.
    async fn connect(&mut self, workspace_root: &Path) -> bool {
        let uri = format!("file://{}", workspace_root.display());
        let params = json!({
            "processId": std::process::id(),
            "rootUri": uri,
            "capabilities": {},
        });
        let reply = self.call("initialize", params, self.config.lsp_connect_timeout).await;
        if reply.is_some() {
            self.notify("initialized", json!({}));
            true
        } else {
            self.inner.lock().state = LspState::Stopped;
            false
        }
    }

    pub async fn shutdown(&mut self) {
        self.inner.lock().state = LspState::Draining;
        let _ = self.call("shutdown", json!(null), self.config.lsp_call_timeout).await;
        self.notify("exit", json!(null));
        let mut guard = self.inner.lock();
        if let Some(mut child) = guard.child.take() {
            let _ = child.start_kill();
        }
        guard.state = LspState::Stopped;
    }

    /// Markdown-rendered hover for the identifier at `(line, col)` (byte
    /// offsets; converted to UTF-16 code units at this boundary). Returns
    /// `None` rather than an error if the server is unavailable or the call
    /// times out — inspection is best-effort.
    pub async fn definition(&mut self, path: &Path, line: usize, col: usize, content: &str) -> Option<String> {
        self.ensure_connected().await;
        self.notify_did_open_or_change(path, content).await;

        let uri = format!("file://{}", path.display());
        let utf16_col = byte_col_to_utf16(content, line, col);
        let params = json!({
            "textDocument": {"uri": uri},
            "position": {"line": line, "character": utf16_col},
        });
        let reply = self.call("textDocument/hover", params, self.config.lsp_call_timeout).await?;
        reply.get("contents").and_then(|c| c.get("value")).and_then(Value::as_str).map(str::to_string)
    }

    /// Text-match completions and a prefix-replace length at `(line, col)`.
    pub async fn complete(&mut self, path: &Path, line: usize, col: usize, content: &str) -> (Vec<String>, usize) {
        self.ensure_connected().await;
        self.notify_did_open_or_change(path, content).await;

        let uri = format!("file://{}", path.display());
        let utf16_col = byte_col_to_utf16(content, line, col);
        let params = json!({
            "textDocument": {"uri": uri},
            "position": {"line": line, "character": utf16_col},
        });
        let Some(reply) = self.call("textDocument/completion", params, self.config.lsp_call_timeout).await else {
            return (Vec::new(), 0);
        };

        let items = reply.get("items").or(Some(&reply)).and_then(Value::as_array).cloned().unwrap_or_default();
        let labels: Vec<String> =
            items.iter().filter_map(|i| i.get("label").and_then(Value::as_str)).map(str::to_string).collect();
        let prefix_len = current_identifier_prefix(content, line, col).len();
        (labels, prefix_len)
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.state() == LspState::Running {
            return true;
        }
        false
    }

    async fn notify_did_open_or_change(&mut self, path: &Path, content: &str) {
        let uri = format!("file://{}", path.display());
        let (event, version) = {
            let mut guard = self.inner.lock();
            match guard.files.get_mut(path) {
                Some(record) if record.content == content => return,
                Some(record) => {
                    record.content = content.to_string();
                    record.version += 1;
                    record.modified = Instant::now();
                    ("change", record.version)
                }
                None => {
                    guard.files.insert(
                        path.to_path_buf(),
                        FileRecord { content: content.to_string(), version: 1, modified: Instant::now() },
                    );
                    ("open", 1)
                }
            }
        };

        if event == "open" {
            self.notify(
                "textDocument/didOpen",
                json!({"textDocument": {"uri": uri, "languageId": "go", "version": version, "text": content}}),
            );
        } else {
            self.notify(
                "textDocument/didChange",
                json!({"textDocument": {"uri": uri, "version": version}, "contentChanges": [{"text": content}]}),
            );
        }
    }

    /// Drain server-initiated diagnostics/log messages queued since the
    /// last call.
    pub fn drain_messages(&self) -> Vec<Value> {
        let mut guard = self.inner.lock();
        guard.messages.drain(..).collect()
    }

    fn notify(&self, method: &str, params: Value) {
        let Some(tx) = &self.outbound_tx else { return };
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let _ = tx.send(frame(&body));
    }

    async fn call(&mut self, method: &str, params: Value, timeout: Duration) -> Option<Value> {
        let Some(tx) = &self.outbound_tx else { return None };
        let id = {
            let mut guard = self.inner.lock();
            let id = guard.next_request_id;
            guard.next_request_id += 1;
            id
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.lock().pending.insert(id, reply_tx);

        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        if tx.send(frame(&body)).is_err() {
            return None;
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => Some(value),
            _ => {
                self.inner.lock().pending.remove(&id);
                None
            }
        }
    }
}

fn frame(body: &Value) -> Vec<u8> {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    let mut out = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    out.extend_from_slice(&payload);
    out
}

async fn read_loop(stdout: tokio::process::ChildStdout, inner: Arc<Mutex<Inner>>) {
    let mut reader = BufReader::new(stdout);
    loop {
        let mut content_length: Option<usize> = None;
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let trimmed = header.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some(value) = trimmed.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().ok();
            }
        }
        let Some(len) = content_length else { continue };
        let mut buf = vec![0u8; len];
        if reader.read_exact(&mut buf).await.is_err() {
            return;
        }
        let Ok(value) = serde_json::from_slice::<Value>(&buf) else { continue };
        dispatch(&inner, value);
    }
}

fn dispatch(inner: &Arc<Mutex<Inner>>, message: Value) {
    let mut guard = inner.lock();
    if let Some(id) = message.get("id").and_then(Value::as_i64) {
        if let Some(sender) = guard.pending.remove(&id) {
            let result = message.get("result").cloned().unwrap_or(Value::Null);
            let _ = sender.send(result);
            return;
        }
    }
    if guard.messages.len() >= MAX_QUEUED_MESSAGES {
        guard.messages.pop_front();
    }
    guard.messages.push_back(message);
}

/// Convert a byte column on `line` of `content` to a UTF-16 code-unit
/// column, the LSP wire convention; conversions happen only at this
/// boundary, never internally.
fn byte_col_to_utf16(content: &str, line: usize, byte_col: usize) -> usize {
    let Some(line_text) = content.lines().nth(line) else { return 0 };
    let clamped = byte_col.min(line_text.len());
    line_text.get(..clamped).map(|s| s.encode_utf16().count()).unwrap_or(0)
}

fn current_identifier_prefix(content: &str, line: usize, byte_col: usize) -> String {
    let Some(line_text) = content.lines().nth(line) else { return String::new() };
    let clamped = byte_col.min(line_text.len());
    let prefix = &line_text[..clamped];
    let start = prefix.rfind(|c: char| !c.is_alphanumeric() && c != '_').map(|i| i + 1).unwrap_or(0);
    prefix[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_to_utf16_handles_multibyte_prefix() {
        let content = "日本語 x := 1\n";
        let col = "日本語 x".len();
        let utf16 = byte_col_to_utf16(content, 0, col);
        assert_eq!(utf16, "日本語 x".encode_utf16().count());
    }

    #[test]
    fn identifier_prefix_stops_at_non_word_char() {
        let content = "foo.Ba\n";
        let prefix = current_identifier_prefix(content, 0, "foo.Ba".len());
        assert_eq!(prefix, "Ba");
    }

    #[test]
    fn frame_emits_content_length_header() {
        let bytes = frame(&json!({"a": 1}));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("Content-Length:"));
        assert!(text.contains("\r\n\r\n"));
    }
}
