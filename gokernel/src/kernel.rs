//! Kernel orchestration loop (§6, §10.5): dispatches every wire message
//! type to the right subsystem and publishes the resulting iopub traffic.
//!
//! Shell and control are driven by two independent tasks, mirroring the
//! protocol's own separation (control must answer `interrupt_request`
//! promptly even while shell is blocked running a cell). They share only
//! the iopub publisher, the widget state and a one-shot interrupt slot;
//! everything else (the pipeline, the language-server supervisor, the
//! declaration store) belongs to the shell task alone.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use gokernel_core::config::Config;
use gokernel_core::diagnostics;
use gokernel_core::lsp::LanguageServerSupervisor;
use gokernel_core::pipeline::{CompileOutcome, ExecutionRequest, KernelState, Pipeline};
use gokernel_core::store::Cursor;
use gokernel_core::tracker::FileTracker;
use gokernel_core::workspace::Workspace;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};

use crate::channels::{IopubChannel, RouterChannel, ShellChannels};
use crate::content::*;
use crate::latch::UnitLatch;
use crate::multiplexer::{self, RunEvent, RunRequest};
use crate::wire::Message;
use crate::widget::WidgetState;

/// A slot the control task writes into to hand an interrupt to whatever
/// cell the shell task currently has running, if any.
type InterruptSlot = Arc<SyncMutex<Option<UnitLatch>>>;

pub struct Kernel {
    channels: ShellChannels,
    control: Option<RouterChannel>,
    pipeline: Pipeline,
    state: KernelState,
    config: Arc<Config>,
    lsp: LanguageServerSupervisor,
    widget: Arc<WidgetState>,
    shim_installed: bool,
}

impl Kernel {
    pub fn new(channels: ShellChannels, control: RouterChannel, workspace: Workspace, tracker: FileTracker, config: Config) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let lsp = LanguageServerSupervisor::new(config.clone());
        let pipeline = Pipeline::new(workspace, tracker, config.clone());
        Self {
            channels,
            control: Some(control),
            pipeline,
            state: KernelState::new(cwd),
            config: Arc::new(config),
            lsp,
            widget: Arc::new(WidgetState::new()),
            shim_installed: false,
        }
    }

    /// Run until a `shutdown_request` (or channel closure) ends the
    /// session.
    pub async fn run(mut self) -> crate::errors::Result<()> {
        self.channels.publish_status(None, Status::STARTING)?;
        self.lsp.start(self.pipeline.workspace.root()).await;

        let shutdown = UnitLatch::new();
        let interrupt_slot: InterruptSlot = Arc::new(SyncMutex::new(None));

        let control = self.control.take().expect("control channel bound exactly once");
        let control_iopub = self.channels.iopub.clone();
        let control_signer = self.channels.signer.clone();
        let control_session = self.channels.session.clone();
        let control_shutdown = shutdown.clone();
        let control_interrupt_slot = interrupt_slot.clone();
        let control_task = tokio::spawn(run_control(
            control,
            control_iopub,
            control_signer,
            control_session,
            control_shutdown,
            control_interrupt_slot,
        ));

        self.run_shell(shutdown.clone(), interrupt_slot).await?;
        shutdown.trigger(());
        let _ = control_task.await;

        self.lsp.shutdown().await;
        let Kernel { pipeline, .. } = self;
        let _ = pipeline.workspace.shutdown(false);
        Ok(())
    }

    async fn run_shell(&mut self, shutdown: UnitLatch, interrupt_slot: InterruptSlot) -> crate::errors::Result<()> {
        loop {
            let frames = tokio::select! {
                _ = shutdown.wait() => break,
                frames = self.channels.shell.recv() => frames,
            };
            let Some(frames) = frames else { break };
            let message = match crate::wire::parse_frames(frames, &self.channels.signer) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed shell frame");
                    continue;
                }
            };
            self.channels.publish_status(Some(&message), Status::BUSY)?;
            if let Err(e) = self.handle_shell_message(&message, &interrupt_slot).await {
                tracing::error!(error = %e, "error handling shell message");
            }
            self.channels.publish_status(Some(&message), Status::IDLE)?;
        }
        Ok(())
    }

    async fn handle_shell_message(&mut self, message: &Message, interrupt_slot: &InterruptSlot) -> crate::errors::Result<()> {
        match message.header.msg_type.as_str() {
            "kernel_info_request" => self.handle_kernel_info(message),
            "execute_request" => self.handle_execute(message, interrupt_slot).await,
            "complete_request" => self.handle_complete(message).await,
            "inspect_request" => self.handle_inspect(message).await,
            "is_complete_request" => self.handle_is_complete(message),
            "history_request" => self.handle_history(message),
            "comm_info_request" => self.handle_comm_info(message),
            "comm_open" => self.handle_comm_open(message),
            "comm_msg" => self.handle_comm_msg(message),
            "comm_close" => self.handle_comm_close(message),
            other => {
                tracing::debug!(msg_type = other, "unhandled shell message type");
                Ok(())
            }
        }
    }

    fn reply(&self, message: &Message, msg_type: &str, content: Value) -> crate::errors::Result<()> {
        self.channels.publish(&message.reply(msg_type, content))
    }

    fn handle_kernel_info(&self, message: &Message) -> crate::errors::Result<()> {
        let content = KernelInfoReply {
            status: "ok",
            protocol_version: "5.3",
            implementation: "gokernel",
            implementation_version: env!("CARGO_PKG_VERSION"),
            language_info: LanguageInfo {
                name: "go",
                version: "1.22".to_string(),
                mimetype: "text/x-go",
                file_extension: ".go",
                pygments_lexer: "go",
            },
            banner: "gokernel: a notebook kernel for Go".to_string(),
        };
        self.reply(message, "kernel_info_reply", serde_json::to_value(content)?)
    }

    fn handle_is_complete(&self, message: &Message) -> crate::errors::Result<()> {
        let req: IsCompleteRequest = message.content_as()?;
        let (status, indent) = classify_completeness(&req.code);
        self.reply(message, "is_complete_reply", serde_json::to_value(IsCompleteReply { status, indent })?)
    }

    fn handle_history(&self, message: &Message) -> crate::errors::Result<()> {
        self.reply(message, "history_reply", serde_json::to_value(HistoryReply { history: Vec::new() })?)
    }

    fn handle_comm_info(&self, message: &Message) -> crate::errors::Result<()> {
        let comms = match self.widget.comm_id() {
            Some(id) => json!({ id: { "target_name": WIDGET_TARGET_NAME } }),
            None => json!({}),
        };
        self.reply(message, "comm_info_reply", serde_json::to_value(CommInfoReply { comms })?)
    }

    fn handle_comm_open(&self, message: &Message) -> crate::errors::Result<()> {
        let open: CommOpen = message.content_as()?;
        if open.target_name == WIDGET_TARGET_NAME {
            self.widget.on_comm_open(open.comm_id);
        }
        Ok(())
    }

    fn handle_comm_close(&self, message: &Message) -> crate::errors::Result<()> {
        let close: CommClose = message.content_as()?;
        if Some(close.comm_id) == self.widget.comm_id() {
            self.widget.on_comm_close();
        }
        Ok(())
    }

    fn handle_comm_msg(&self, message: &Message) -> crate::errors::Result<()> {
        let msg: CommMsg = message.content_as()?;
        if Some(&msg.comm_id) != self.widget.comm_id().as_ref() {
            return Ok(());
        }
        if let Ok(envelope) = serde_json::from_value::<WidgetEnvelope>(msg.data) {
            self.widget.dispatch(&envelope);
        }
        Ok(())
    }

    async fn handle_complete(&mut self, message: &Message) -> crate::errors::Result<()> {
        let req: CompleteRequest = message.content_as()?;
        let (line, col) = offset_to_line_col(&req.code, req.cursor_pos);
        let path = self.pipeline.workspace.source_path(gokernel_core::workspace::CellMode::Normal);
        let (matches, prefix_len) = self.lsp.complete(&path, line, col, &req.code).await;
        let cursor_start = req.cursor_pos.saturating_sub(prefix_len);
        let content =
            CompleteReply { status: "ok", matches, cursor_start, cursor_end: req.cursor_pos, metadata: json!({}) };
        self.reply(message, "complete_reply", serde_json::to_value(content)?)
    }

    async fn handle_inspect(&mut self, message: &Message) -> crate::errors::Result<()> {
        let req: InspectRequest = message.content_as()?;
        let (line, col) = offset_to_line_col(&req.code, req.cursor_pos);
        let path = self.pipeline.workspace.source_path(gokernel_core::workspace::CellMode::Normal);
        let hover = self.lsp.definition(&path, line, col, &req.code).await;
        let content = match hover {
            Some(text) => InspectReply {
                status: "ok",
                found: true,
                data: json!({ "text/plain": text }),
                metadata: json!({}),
            },
            None => InspectReply { status: "ok", found: false, data: json!({}), metadata: json!({}) },
        };
        self.reply(message, "inspect_reply", serde_json::to_value(content)?)
    }

    async fn handle_execute(&mut self, message: &Message, interrupt_slot: &InterruptSlot) -> crate::errors::Result<()> {
        let req: ExecuteRequest = message.content_as()?;
        self.ensure_widget_shim(message)?;

        let test_mode = message.metadata.get("test_mode").and_then(Value::as_bool).unwrap_or(false);
        let wasm_mode = message.metadata.get("wasm_mode").and_then(Value::as_bool).unwrap_or(false);

        let execution_id = self.pipeline.next_execution_id();
        let request = ExecutionRequest {
            cell_id: message.header.msg_id.clone(),
            text: req.code.clone(),
            cursor: Cursor::NONE,
            test_mode,
            wasm_mode,
        };

        let (outcome, merged) = match self.pipeline.run(&mut self.state, request).await {
            Ok(pair) => pair,
            Err(e) => {
                self.publish_error(message, "PipelineError", &e.to_string(), vec![e.to_string()])?;
                return self.reply(
                    message,
                    "execute_reply",
                    serde_json::to_value(ExecuteReply::Error {
                        execution_count: execution_id,
                        ename: "PipelineError".to_string(),
                        evalue: e.to_string(),
                        traceback: vec![e.to_string()],
                    })?,
                );
            }
        };

        match outcome {
            CompileOutcome::NoCompileNeeded { directive_output, shell_escapes } => {
                // No program ran; any directive output (`%list`, `%remove`,
                // ...) is the cell's whole result rather than something a
                // running program displayed as a side effect.
                for escape in shell_escapes {
                    self.run_shell_escape(message, escape).await?;
                }
                if !directive_output.is_empty() {
                    self.publish_execute_result(message, execution_id, &directive_output.join("\n"))?;
                }
                self.reply(message, "execute_reply", serde_json::to_value(ExecuteReply::Ok { execution_count: execution_id })?)
            }
            CompileOutcome::ParseFailed(detail) => {
                self.publish_error(message, "ParseError", &detail, vec![detail.clone()])?;
                self.reply(
                    message,
                    "execute_reply",
                    serde_json::to_value(ExecuteReply::Error {
                        execution_count: execution_id,
                        ename: "ParseError".to_string(),
                        evalue: detail.clone(),
                        traceback: vec![detail],
                    })?,
                )
            }
            CompileOutcome::CompilerDiagnostics(diags) => {
                let traceback: Vec<String> = diags.iter().map(diagnostics::render_plain_text).collect();
                for diag in &diags {
                    self.publish_display_html(message, &diagnostics::render_html(diag))?;
                }
                let evalue = diags.first().map(|d| d.message.clone()).unwrap_or_default();
                self.publish_error(message, "CompileError", &evalue, traceback.clone())?;
                self.reply(
                    message,
                    "execute_reply",
                    serde_json::to_value(ExecuteReply::Error {
                        execution_count: execution_id,
                        ename: "CompileError".to_string(),
                        evalue,
                        traceback,
                    })?,
                )
            }
            CompileOutcome::Ready { binary_path, rendered_source: _, line_map, args, wasm_mode, shell_escapes } => {
                // Declarations are retained as soon as the compile itself
                // succeeds, independent of what the running program does.
                self.pipeline.commit(&mut self.state, merged);

                for escape in shell_escapes {
                    self.run_shell_escape(message, escape).await?;
                }

                if wasm_mode {
                    self.publish_stream(
                        message,
                        Stream::stdout(format!("compiled WASM binary at {}\n", binary_path.display())),
                    )?;
                    return self.reply(message, "execute_reply", serde_json::to_value(ExecuteReply::Ok { execution_count: execution_id })?);
                }

                self.run_and_stream(message, execution_id, binary_path, args, line_map, req.allow_stdin, interrupt_slot).await
            }
        }
    }

    async fn run_and_stream(
        &mut self,
        message: &Message,
        execution_id: u64,
        binary_path: PathBuf,
        args: Vec<String>,
        line_map: gokernel_core::parser::LineMap,
        allow_stdin: bool,
        interrupt_slot: &InterruptSlot,
    ) -> crate::errors::Result<()> {
        let workspace = &self.pipeline.workspace;
        let request = RunRequest {
            binary_path,
            args,
            env: self.state.env.clone(),
            cwd: self.state.cwd.clone(),
            rendered_path: workspace.source_path(gokernel_core::workspace::CellMode::Normal).display().to_string(),
            line_map,
            rich_fifo: workspace.fifo_path(execution_id),
            widget_fifo: workspace.widget_fifo_path(execution_id),
            temp_dir: workspace.root().to_path_buf(),
            jupyter_root: self.state.cwd.clone(),
            input_prompt_delay: allow_stdin.then_some(self.config.input_prompt_delay),
        };

        let mut handle = multiplexer::spawn(request)?;
        interrupt_slot.lock().replace(handle.interrupt.clone());

        let mut seen_display_ids: HashSet<String> = HashSet::new();
        let mut subscribed_addresses: Vec<String> = Vec::new();
        let stdin = self.channels.stdin.clone();

        while let Some(event) = handle.events.recv().await {
            match event {
                RunEvent::Stdout(line) => {
                    self.publish_stream(message, Stream::stdout(format!("{line}\n")))?;
                }
                RunEvent::Stderr(line) => {
                    self.publish_stream(message, Stream::stderr(format!("{line}\n")))?;
                }
                RunEvent::Display(data) => {
                    self.publish_display(message, data, &mut seen_display_ids)?;
                }
                RunEvent::InputRequest { prompt, password } => {
                    if let Some(value) = request_input(&stdin, message, &self.channels.signer, prompt, password).await? {
                        let _ = handle.input_reply_tx.send(value);
                    }
                }
                RunEvent::WidgetSubscribe(addresses) => {
                    self.widget.subscribe(addresses.clone(), handle.widget_tx.clone());
                    subscribed_addresses.extend(addresses);
                }
            }
        }

        let outcome = handle.wait().await;
        interrupt_slot.lock().take();
        self.widget.unsubscribe_all(&subscribed_addresses);

        match outcome.exit_code {
            Some(0) => self.reply(message, "execute_reply", serde_json::to_value(ExecuteReply::Ok { execution_count: execution_id })?),
            _ => {
                let mut evalue = format!("child process exited with status {:?}", outcome.exit_code);
                if outcome.interrupted {
                    evalue = format!("{}: {}", diagnostics::INTERRUPT_MARKER, evalue);
                }
                self.publish_error(message, "RuntimeError", &evalue, vec![evalue.clone()])?;
                self.reply(
                    message,
                    "execute_reply",
                    serde_json::to_value(ExecuteReply::Error {
                        execution_count: execution_id,
                        ename: "RuntimeError".to_string(),
                        evalue,
                        traceback: Vec::new(),
                    })?,
                )
            }
        }
    }

    /// Run one `!`/`!*` shell escape (§4.9) to completion and stream its
    /// combined output; not multiplexed through the rich-content pipe since
    /// shell escapes never link against this kernel's side-channel library.
    async fn run_shell_escape(
        &mut self,
        message: &Message,
        escape: gokernel_core::pipeline::ShellEscapeRequest,
    ) -> crate::errors::Result<()> {
        let cwd = if escape.in_workspace { self.pipeline.workspace.root().to_path_buf() } else { self.state.cwd.clone() };

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&escape.command)
            .current_dir(&cwd)
            .envs(&self.state.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn()?;

        if escape.interactive {
            let prompt = format!("{}: ", escape.command);
            if let Some(value) = request_input(&self.channels.stdin, message, &self.channels.signer, prompt, escape.password).await? {
                if let Some(mut stdin) = child.stdin.take() {
                    use tokio::io::AsyncWriteExt;
                    let _ = stdin.write_all(value.as_bytes()).await;
                    let _ = stdin.write_all(b"\n").await;
                }
            }
        }
        // Drop whichever end of stdin is still open (either because the
        // escape wasn't interactive, or the reply above already wrote and
        // returned it) so the child sees EOF instead of hanging.
        child.stdin.take();

        let output = child.wait_with_output().await?;
        if !output.stdout.is_empty() {
            self.publish_stream(message, Stream::stdout(String::from_utf8_lossy(&output.stdout).into_owned()))?;
        }
        if !output.stderr.is_empty() {
            self.publish_stream(message, Stream::stderr(String::from_utf8_lossy(&output.stderr).into_owned()))?;
        }
        Ok(())
    }

    fn ensure_widget_shim(&mut self, _message: &Message) -> crate::errors::Result<()> {
        if !self.shim_installed {
            self.publish_display_value(WidgetState::shim_display_data())?;
            self.shim_installed = true;
        } else if self.widget.needs_heartbeat(self.config.heartbeat_staleness_threshold) {
            if let Some(comm_id) = self.widget.comm_id() {
                self.publish_comm_msg(comm_id, WidgetState::ping_envelope())?;
            }
        }
        Ok(())
    }

    fn publish_comm_msg(&self, comm_id: String, envelope: WidgetEnvelope) -> crate::errors::Result<()> {
        let content = json!({ "comm_id": comm_id, "data": envelope });
        let message = Message::new_root(&self.channels.session, "comm_msg", content);
        self.channels.publish(&message)
    }

    fn publish_display_value(&self, value: Value) -> crate::errors::Result<()> {
        let message = Message::new_root(&self.channels.session, "display_data", value);
        self.channels.publish(&message)
    }

    fn publish_execute_result(&self, parent: &Message, execution_count: u64, html: &str) -> crate::errors::Result<()> {
        let content = ExecuteResult { execution_count, data: json!({ "text/html": html }), metadata: json!({}) };
        self.reply(parent, "execute_result", serde_json::to_value(content)?)
    }

    fn publish_display_html(&self, parent: &Message, html: &str) -> crate::errors::Result<()> {
        let content = DisplayDataContent { data: json!({ "text/html": html }), metadata: json!({}), transient: None };
        self.reply(parent, "display_data", serde_json::to_value(content)?)
    }

    fn publish_display(
        &self,
        parent: &Message,
        data: gokernel_core::sidechannel::DisplayData,
        seen_display_ids: &mut HashSet<String>,
    ) -> crate::errors::Result<()> {
        let mut mime_map = serde_json::Map::new();
        for (mime, bytes) in &data.data {
            let value = String::from_utf8(bytes.clone()).map(Value::String).unwrap_or_else(|_| json!(bytes));
            mime_map.insert(mime.clone(), value);
        }
        let metadata: serde_json::Map<String, Value> = data.metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        let transient = data.display_id.clone().map(|id| json!({ "display_id": id }));
        let msg_type = match &data.display_id {
            Some(id) if seen_display_ids.contains(id) => "update_display_data",
            Some(id) => {
                seen_display_ids.insert(id.clone());
                "display_data"
            }
            None => "display_data",
        };
        let content = DisplayDataContent { data: Value::Object(mime_map), metadata: Value::Object(metadata), transient };
        self.reply(parent, msg_type, serde_json::to_value(content)?)
    }

    fn publish_stream(&self, parent: &Message, stream: Stream) -> crate::errors::Result<()> {
        self.reply(parent, "stream", serde_json::to_value(stream)?)
    }

    fn publish_error(&self, parent: &Message, ename: &str, evalue: &str, traceback: Vec<String>) -> crate::errors::Result<()> {
        let content = ErrorContent { ename: ename.to_string(), evalue: evalue.to_string(), traceback };
        self.reply(parent, "error", serde_json::to_value(content)?)
    }
}

/// Send an `input_request` on the stdin channel and block (this call only,
/// not the whole kernel) for the matching `input_reply`.
async fn request_input(
    stdin: &Arc<tokio::sync::Mutex<RouterChannel>>,
    parent: &Message,
    signer: &crate::wire::Signer,
    prompt: String,
    password: bool,
) -> crate::errors::Result<Option<String>> {
    let mut guard = stdin.lock().await;
    let request = parent.reply("input_request", serde_json::to_value(InputRequestContent { prompt, password })?);
    let frames = crate::wire::encode_frames(&request, signer)?;
    guard.send(frames)?;

    let Some(reply_frames) = guard.recv().await else { return Ok(None) };
    let reply = crate::wire::parse_frames(reply_frames, signer)?;
    let content: InputReply = reply.content_as()?;
    Ok(Some(content.value))
}

async fn run_control(
    mut control: RouterChannel,
    iopub: Arc<IopubChannel>,
    signer: crate::wire::Signer,
    session: String,
    shutdown: UnitLatch,
    interrupt_slot: InterruptSlot,
) {
    loop {
        let Some(frames) = control.recv().await else { break };
        let message = match crate::wire::parse_frames(frames, &signer) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed control frame");
                continue;
            }
        };
        match message.header.msg_type.as_str() {
            "shutdown_request" => {
                let req: std::result::Result<ShutdownRequest, _> = message.content_as();
                let restart = req.map(|r| r.restart).unwrap_or(false);
                let reply = message.reply("shutdown_reply", json!(ShutdownReply { restart }));
                let _ = publish_via(&control, &reply, &signer);
                shutdown.trigger(());
                break;
            }
            "interrupt_request" => {
                if let Some(latch) = interrupt_slot.lock().clone() {
                    latch.trigger(());
                }
                let reply = message.reply("interrupt_reply", json!(InterruptReply {}));
                let _ = publish_via(&control, &reply, &signer);
            }
            "kernel_info_request" => {
                // Some front-ends probe kernel_info on control too; reply
                // with the bare minimum rather than duplicating the shell
                // handler's richer banner lookup.
                let status = Status::IDLE;
                let _ = iopub.send(crate::wire::encode_frames(&Message::new_root(&session, "status", json!(status)), &signer).unwrap_or_default());
                let reply = message.reply("kernel_info_reply", json!({ "status": "ok", "protocol_version": "5.3" }));
                let _ = publish_via(&control, &reply, &signer);
            }
            other => {
                tracing::debug!(msg_type = other, "unhandled control message type");
            }
        }
    }
}

fn publish_via(control: &RouterChannel, message: &Message, signer: &crate::wire::Signer) -> crate::errors::Result<()> {
    let frames = crate::wire::encode_frames(message, signer)?;
    control.send(frames)
}

/// Convert a character offset within `code` (the protocol's `cursor_pos`)
/// into a zero-indexed `(line, byte_column)` pair.
fn offset_to_line_col(code: &str, cursor_pos: usize) -> (usize, usize) {
    let mut remaining = cursor_pos;
    for (line_no, line) in code.split('\n').enumerate() {
        let len = line.chars().count();
        if remaining <= len {
            let byte_col = line.char_indices().nth(remaining).map(|(i, _)| i).unwrap_or(line.len());
            return (line_no, byte_col);
        }
        remaining -= len + 1;
    }
    (0, 0)
}

/// A best-effort `is_complete_request` heuristic: tracks bracket nesting
/// and trailing backslash continuation, ignoring string/rune literal
/// content.
fn classify_completeness(code: &str) -> (&'static str, Option<String>) {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for c in code.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    if in_string || depth > 0 {
        ("incomplete", Some("\t".to_string()))
    } else if depth < 0 {
        ("invalid", None)
    } else {
        ("complete", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_to_line_col_finds_second_line() {
        let code = "a := 1\nb := 2\n";
        let (line, col) = offset_to_line_col(code, 8);
        assert_eq!(line, 1);
        assert_eq!(col, 1);
    }

    #[test]
    fn classify_completeness_detects_open_brace() {
        assert_eq!(classify_completeness("func f() {").0, "incomplete");
        assert_eq!(classify_completeness("func f() {}").0, "complete");
        assert_eq!(classify_completeness("}").0, "invalid");
    }

    #[test]
    fn classify_completeness_ignores_braces_in_strings() {
        assert_eq!(classify_completeness(r#"fmt.Println("{")"#).0, "complete");
    }
}
