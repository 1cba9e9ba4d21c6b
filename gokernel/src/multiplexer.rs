//! Program I/O multiplexer (C8): spawns the compiled cell binary, forwards
//! its stdout/stderr, decodes the rich-content side pipe (display data,
//! input requests, widget subscriptions) and delivers widget traffic back
//! to it over a second pipe.
//!
//! The FIFO path, temp dir and Jupyter root are exported to the child as
//! environment variables (§6); names are this kernel's own choice and held
//! stable for the run's duration, matching the language-server
//! supervisor's convention of never mutating a running child's environment.
//!
//! Concurrency: two stream forwarders, one rich-content pipe reader and
//! (when requested) one input-prompt driver run as independent tasks,
//! coordinated by a shared [`UnitLatch`] so any of them can signal the
//! others to stop once the child exits or is interrupted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use gokernel_core::diagnostics;
use gokernel_core::parser::LineMap;
use gokernel_core::sidechannel::{self, SideChannelRecord, WidgetMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::latch::UnitLatch;

pub const ENV_RICH_FIFO: &str = "GOKERNEL_FIFO";
pub const ENV_WIDGET_FIFO: &str = "GOKERNEL_WIDGET_FIFO";
pub const ENV_TEMP_DIR: &str = "GOKERNEL_TMPDIR";
pub const ENV_JUPYTER_ROOT: &str = "GOKERNEL_JUPYTER_ROOT";

/// Something the multiplexer observed while a cell's binary was running,
/// raised up to the kernel loop for publication on iopub. The multiplexer
/// itself knows nothing about the wire protocol.
#[derive(Debug)]
pub enum RunEvent {
    Stdout(String),
    Stderr(String),
    Display(sidechannel::DisplayData),
    InputRequest { prompt: String, password: bool },
    WidgetSubscribe(Vec<String>),
}

pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub interrupted: bool,
}

pub struct RunRequest {
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub rendered_path: String,
    pub line_map: LineMap,
    pub rich_fifo: PathBuf,
    pub widget_fifo: PathBuf,
    pub temp_dir: PathBuf,
    pub jupyter_root: PathBuf,
    /// When set, a front-end input prompt is raised unprompted after this
    /// delay even if the child never sent its own input-request record
    /// (§4.8); `None` when the cell's `allow_stdin` is false.
    pub input_prompt_delay: Option<std::time::Duration>,
}

/// A running cell program and the handles used to interact with it while
/// it runs.
pub struct RunHandle {
    pub events: mpsc::UnboundedReceiver<RunEvent>,
    pub input_reply_tx: mpsc::UnboundedSender<String>,
    pub widget_tx: mpsc::UnboundedSender<WidgetMessage>,
    pub interrupt: UnitLatch,
    join: tokio::task::JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub async fn wait(self) -> RunOutcome {
        self.join.await.unwrap_or(RunOutcome { exit_code: None, interrupted: false })
    }
}

/// Spawn the compiled binary and all of C8's supporting tasks.
pub fn spawn(request: RunRequest) -> crate::errors::Result<RunHandle> {
    sidechannel::make_fifo(&request.rich_fifo)?;
    sidechannel::make_fifo(&request.widget_fifo)?;

    let mut command = Command::new(&request.binary_path);
    command
        .args(&request.args)
        .envs(&request.env)
        .env(ENV_RICH_FIFO, &request.rich_fifo)
        .env(ENV_WIDGET_FIFO, &request.widget_fifo)
        .env(ENV_TEMP_DIR, &request.temp_dir)
        .env(ENV_JUPYTER_ROOT, &request.jupyter_root)
        .current_dir(&request.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Its own process group, so a notebook-level interrupt signal
        // delivered to the kernel's group does not also reach the child;
        // the multiplexer kills it explicitly instead.
        command.process_group(0);
    }

    let mut child = command.spawn()?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("piped");
    let stderr = child.stderr.take().expect("piped");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (input_reply_tx, mut input_reply_rx) = mpsc::unbounded_channel::<String>();
    let (widget_tx, mut widget_rx) = mpsc::unbounded_channel::<WidgetMessage>();
    let interrupt = UnitLatch::new();
    let done = UnitLatch::new();

    let rendered_path = request.rendered_path.clone();
    let line_map = request.line_map.clone();
    let stdout_tx = events_tx.clone();
    let stdout_interrupt = interrupt.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = stdout_interrupt.wait() => break,
                line = lines.next_line() => match line {
                    Ok(Some(text)) => {
                        if stdout_tx.send(RunEvent::Stdout(text)).is_err() {
                            break;
                        }
                    }
                    _ => break,
                },
            }
        }
    });

    let stderr_tx = events_tx.clone();
    let stderr_interrupt = interrupt.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                _ = stderr_interrupt.wait() => break,
                line = lines.next_line() => match line {
                    Ok(Some(text)) => {
                        let rewritten = diagnostics::rewrite_stack_line(&text, &rendered_path, &line_map);
                        if stderr_tx.send(RunEvent::Stderr(rewritten)).is_err() {
                            break;
                        }
                    }
                    _ => break,
                },
            }
        }
    });

    let rich_fifo_path = request.rich_fifo.clone();
    let rich_tx = events_tx.clone();
    let rich_interrupt = interrupt.clone();
    tokio::spawn(async move {
        // Opening for read blocks until a writer shows up; race it against
        // the interrupt latch so a child that never opens the pipe doesn't
        // wedge this task past execution end.
        let open = tokio::fs::OpenOptions::new().read(true).open(&rich_fifo_path);
        let mut file = tokio::select! {
            _ = rich_interrupt.wait() => return,
            opened = open => match opened {
                Ok(f) => f,
                Err(_) => return,
            },
        };
        loop {
            tokio::select! {
                _ = rich_interrupt.wait() => break,
                record = sidechannel::decode_one(&mut file) => match record {
                    Ok(Some(SideChannelRecord::Display(data))) => {
                        if rich_tx.send(RunEvent::Display(data)).is_err() {
                            break;
                        }
                    }
                    Ok(Some(SideChannelRecord::Input(req))) => {
                        if rich_tx.send(RunEvent::InputRequest { prompt: req.prompt, password: req.password }).is_err() {
                            break;
                        }
                    }
                    Ok(Some(SideChannelRecord::Subscribe(sub))) => {
                        if rich_tx.send(RunEvent::WidgetSubscribe(sub.addresses)).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                },
            }
        }
    });

    // Writes replies typed via `input_reply` into the child's stdin, and
    // forwards widget traffic into the widget FIFO. Both are best-effort:
    // a child that exits mid-run simply stops reading.
    let widget_fifo_path = request.widget_fifo.clone();
    tokio::spawn(async move {
        let mut stdin = stdin;
        let widget_file = tokio::fs::OpenOptions::new().write(true).open(&widget_fifo_path).await.ok();
        let mut widget_file = widget_file;
        loop {
            tokio::select! {
                reply = input_reply_rx.recv() => match reply {
                    Some(value) => {
                        if let Some(ref mut s) = stdin {
                            let _ = s.write_all(value.as_bytes()).await;
                            let _ = s.write_all(b"\n").await;
                        }
                    }
                    None => break,
                },
                message = widget_rx.recv() => match message {
                    Some(msg) => {
                        if let Some(ref mut f) = widget_file {
                            if let Ok(body) = postcard::to_stdvec(&msg) {
                                let mut framed = Vec::with_capacity(4 + body.len());
                                framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
                                framed.extend_from_slice(&body);
                                let _ = f.write_all(&framed).await;
                            }
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Optional input-prompt driver (§4.8): raises an `input_request` on its
    // own after `input_prompt_delay` even without a child-initiated record,
    // so a program reading from stdin without using the rich-content
    // library still gets a front-end prompt. Suppressed as soon as the
    // child finishes or the run is interrupted.
    if let Some(delay) = request.input_prompt_delay {
        let prompt_tx = events_tx.clone();
        let prompt_interrupt = interrupt.clone();
        let prompt_done = done.clone();
        tokio::spawn(async move {
            if wait_for_prompt_delay(delay, prompt_interrupt, prompt_done).await {
                let _ = prompt_tx.send(RunEvent::InputRequest { prompt: String::new(), password: false });
            }
        });
    }

    let child_interrupt = interrupt.clone();
    let child_done = done.clone();
    let rich_fifo_cleanup = request.rich_fifo.clone();
    let widget_fifo_cleanup = request.widget_fifo.clone();
    let join = tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => RunOutcome { exit_code: status.ok().and_then(|s| s.code()), interrupted: false },
            _ = child_interrupt.wait() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                RunOutcome { exit_code: None, interrupted: true }
            }
        };
        child_done.trigger(());
        // Unblock a reader task that opened the FIFO for read but never
        // got a writer, by briefly opening the write side ourselves, then
        // remove both pipes (§4.8's documented fallback).
        if let Ok(f) = tokio::fs::OpenOptions::new().write(true).open(&rich_fifo_cleanup).await {
            drop(f);
        }
        let _ = tokio::fs::remove_file(&rich_fifo_cleanup).await;
        let _ = tokio::fs::remove_file(&widget_fifo_cleanup).await;
        outcome
    });

    Ok(RunHandle { events: events_rx, input_reply_tx, widget_tx, interrupt, join })
}

/// Races the input-prompt delay against interruption or the child already
/// finishing; returns whether the prompt should actually fire.
async fn wait_for_prompt_delay(delay: std::time::Duration, interrupt: UnitLatch, done: UnitLatch) -> bool {
    tokio::select! {
        _ = interrupt.wait() => false,
        _ = done.wait() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn env_var_names_are_stable() {
        assert_eq!(ENV_RICH_FIFO, "GOKERNEL_FIFO");
        assert_eq!(ENV_WIDGET_FIFO, "GOKERNEL_WIDGET_FIFO");
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_delay_fires_when_nothing_preempts_it() {
        let interrupt = UnitLatch::new();
        let done = UnitLatch::new();
        let handle = tokio::spawn(wait_for_prompt_delay(Duration::from_millis(50), interrupt, done));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_delay_is_suppressed_once_child_is_done() {
        let interrupt = UnitLatch::new();
        let done = UnitLatch::new();
        done.trigger(());
        let handle = tokio::spawn(wait_for_prompt_delay(Duration::from_millis(50), interrupt, done));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_delay_is_suppressed_on_interrupt() {
        let interrupt = UnitLatch::new();
        let done = UnitLatch::new();
        interrupt.trigger(());
        let handle = tokio::spawn(wait_for_prompt_delay(Duration::from_millis(50), interrupt, done));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!handle.await.unwrap());
    }
}
