//! ZMQ socket setup for the five logical channels (§6): shell and control
//! are ROUTER, iopub is PUB, stdin is a ROUTER used for input replies, and
//! heartbeat is a raw REP echo.
//!
//! `zmq` sockets are blocking, so each is driven from its own OS thread
//! (mirroring the file-tracker's watcher task bridging a callback API into
//! an async channel) and bridged into the tokio runtime with `mpsc`
//! channels; the kernel loop itself stays entirely async.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::connection::ConnectionInfo;
use crate::errors::Result;
use crate::wire::{self, Message, Signer};

/// A channel the kernel can both receive requests from and send replies on
/// (shell, control, stdin all share this ROUTER shape).
pub struct RouterChannel {
    socket: Arc<zmq::Socket>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
}

impl RouterChannel {
    fn bind(ctx: &zmq::Context, endpoint: &str) -> Result<Arc<zmq::Socket>> {
        let socket = ctx.socket(zmq::ROUTER)?;
        socket.bind(endpoint)?;
        Ok(Arc::new(socket))
    }

    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = Self::bind(ctx, endpoint)?;
        let (tx, inbound_rx) = mpsc::unbounded_channel();
        let reader_socket = socket.clone();
        std::thread::spawn(move || loop {
            match reader_socket.recv_multipart(0) {
                Ok(frames) => {
                    if tx.send(frames).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });
        Ok(Self { socket, inbound_rx })
    }

    pub async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.inbound_rx.recv().await
    }

    pub fn send(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        self.socket.send_multipart(frames, 0)?;
        Ok(())
    }
}

/// The broadcast channel: write-only from the kernel's perspective.
pub struct IopubChannel {
    socket: zmq::Socket,
}

impl IopubChannel {
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self> {
        let socket = ctx.socket(zmq::PUB)?;
        socket.bind(endpoint)?;
        // PUB sockets silently drop early subscribers' first messages while
        // the subscription propagates; a short settle avoids losing the
        // kernel's first `status: starting` broadcast.
        std::thread::sleep(std::time::Duration::from_millis(150));
        Ok(Self { socket })
    }

    pub fn send(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        self.socket.send_multipart(frames, 0)?;
        Ok(())
    }
}

/// Raw heartbeat echo: whatever bytes arrive are sent back verbatim. Runs
/// entirely on its own thread since it never touches kernel state.
pub fn spawn_heartbeat(ctx: zmq::Context, endpoint: &str) -> Result<()> {
    let socket = ctx.socket(zmq::REP)?;
    socket.bind(endpoint)?;
    std::thread::spawn(move || loop {
        match socket.recv_bytes(0) {
            Ok(bytes) => {
                if socket.send(&bytes, 0).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
    Ok(())
}

/// The channels the shell task drives directly: request/reply (shell),
/// broadcast (iopub) and the stdin request/reply pair used for input
/// prompts. Control is handled by its own task (see `kernel::run_control`)
/// and is handed to the caller separately by [`bind`].
pub struct ShellChannels {
    pub shell: RouterChannel,
    pub stdin: Arc<AsyncMutex<RouterChannel>>,
    pub iopub: Arc<IopubChannel>,
    pub signer: Signer,
    pub session: String,
}

impl ShellChannels {
    pub fn publish(&self, message: &Message) -> Result<()> {
        let frames = wire::encode_frames(message, &self.signer)?;
        self.iopub.send(frames)
    }

    pub fn publish_status(&self, parent: Option<&Message>, status: crate::content::Status) -> Result<()> {
        let content = serde_json::to_value(status).map_err(crate::errors::Error::Json)?;
        let message = match parent {
            Some(p) => p.reply("status", content),
            None => Message::new_root(&self.session, "status", content),
        };
        self.publish(&message)
    }
}

/// Bind all five channels and start the heartbeat thread. Returns the
/// shell-facing bundle plus the control channel on its own, since control
/// is driven by an independent task.
pub fn bind(info: &ConnectionInfo) -> Result<(ShellChannels, RouterChannel)> {
    let ctx = zmq::Context::new();
    let shell = RouterChannel::new(&ctx, &info.endpoint(info.shell_port))?;
    let control = RouterChannel::new(&ctx, &info.endpoint(info.control_port))?;
    let stdin = RouterChannel::new(&ctx, &info.endpoint(info.stdin_port))?;
    let iopub = IopubChannel::new(&ctx, &info.endpoint(info.iopub_port))?;
    spawn_heartbeat(ctx, &info.endpoint(info.hb_port))?;

    let channels = ShellChannels {
        shell,
        stdin: Arc::new(AsyncMutex::new(stdin)),
        iopub: Arc::new(iopub),
        signer: Signer::new(&info.key),
        session: uuid::Uuid::new_v4().to_string(),
    };
    Ok((channels, control))
}
