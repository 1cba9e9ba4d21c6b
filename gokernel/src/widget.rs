//! Front-end widget channel (§4.8): a single comm carrying `{address,
//! value}` envelopes plus the protocol-private heartbeat/ack addresses. A
//! JavaScript shim is injected once via a transient display; after it
//! opens the comm back to the kernel, traffic flows both ways keyed by
//! the program's subscribed addresses.
//!
//! One mutex guards the state, matching the language-server supervisor's
//! single-lock convention; callbacks that publish messages acquire it only
//! for the duration of reading/updating bookkeeping, never while awaiting.

use std::collections::HashMap;
use std::time::Instant;

use gokernel_core::sidechannel::WidgetMessage;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::content::{WidgetEnvelope, ADDR_COMM_OPEN_ACK, ADDR_HEARTBEAT_PING, ADDR_HEARTBEAT_PONG};

/// The JS shim injected into the front-end once per kernel session. It
/// opens a comm on [`WIDGET_TARGET_NAME`] and relays `comm_msg` traffic to
/// a small in-page dispatcher the notebook's own widget library attaches
/// to.
const SHIM_SOURCE: &str = r#"
(function() {
  if (window.__gokernelWidgetComm) { return; }
  const comm = Jupyter.notebook.kernel.comm_manager.new_comm("gokernel.widget", {});
  window.__gokernelWidgetComm = comm;
  comm.on_msg(function(msg) {
    const env = msg.content.data;
    window.dispatchEvent(new CustomEvent("gokernel:widget", { detail: env }));
  });
  comm.send({ address: "#comm_open_ack", value: true });
})();
"#;

struct Inner {
    comm_id: Option<String>,
    last_message: Option<Instant>,
    alive: bool,
    subscriptions: HashMap<String, mpsc::UnboundedSender<WidgetMessage>>,
}

/// Tracks comm lifecycle, heartbeat liveness and per-execution address
/// subscriptions for the widget channel.
pub struct WidgetState {
    inner: Mutex<Inner>,
}

impl WidgetState {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { comm_id: None, last_message: None, alive: false, subscriptions: HashMap::new() }) }
    }

    pub fn shim_display_data() -> Value {
        json!({
            "data": { "application/javascript": SHIM_SOURCE },
            "metadata": {},
            "transient": { "display_id": "gokernel-widget-shim" },
        })
    }

    pub fn on_comm_open(&self, comm_id: String) {
        let mut inner = self.inner.lock();
        inner.comm_id = Some(comm_id);
        inner.alive = true;
        inner.last_message = Some(Instant::now());
    }

    pub fn on_comm_close(&self) {
        let mut inner = self.inner.lock();
        inner.comm_id = None;
        inner.alive = false;
    }

    pub fn comm_id(&self) -> Option<String> {
        self.inner.lock().comm_id.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().alive
    }

    /// Whether the shim should send a heartbeat ping before being
    /// reinstalled, because no traffic has been seen in longer than
    /// `threshold`.
    pub fn needs_heartbeat(&self, threshold: std::time::Duration) -> bool {
        match self.inner.lock().last_message {
            Some(last) => last.elapsed() > threshold,
            None => true,
        }
    }

    pub fn mark_pong_received(&self) {
        let mut inner = self.inner.lock();
        inner.alive = true;
        inner.last_message = Some(Instant::now());
    }

    pub fn mark_heartbeat_timeout(&self) {
        self.inner.lock().alive = false;
    }

    /// Register interest in a set of addresses for the duration of one
    /// cell's execution; messages for those addresses are forwarded to
    /// `sender` until [`Self::unsubscribe`] removes it.
    pub fn subscribe(&self, addresses: Vec<String>, sender: mpsc::UnboundedSender<WidgetMessage>) {
        let mut inner = self.inner.lock();
        for address in addresses {
            inner.subscriptions.insert(address, sender.clone());
        }
    }

    pub fn unsubscribe_all(&self, addresses: &[String]) {
        let mut inner = self.inner.lock();
        for address in addresses {
            inner.subscriptions.remove(address);
        }
    }

    /// Dispatch an incoming `comm_msg` envelope: update heartbeat
    /// bookkeeping for protocol-private addresses, or forward to a
    /// subscribed program. Returns `true` if the envelope was a
    /// heartbeat pong (callers use this to avoid double-counting it as
    /// user traffic).
    pub fn dispatch(&self, envelope: &WidgetEnvelope) -> bool {
        {
            let mut inner = self.inner.lock();
            inner.last_message = Some(Instant::now());
        }
        if envelope.address == ADDR_HEARTBEAT_PONG {
            self.mark_pong_received();
            return true;
        }
        if envelope.address == ADDR_COMM_OPEN_ACK {
            return true;
        }
        let sender = self.inner.lock().subscriptions.get(&envelope.address).cloned();
        if let Some(sender) = sender {
            let value = serde_json::to_vec(&envelope.value).unwrap_or_default();
            let _ = sender.send(WidgetMessage { address: envelope.address.clone(), value });
        }
        false
    }

    pub fn ping_envelope() -> WidgetEnvelope {
        WidgetEnvelope { address: ADDR_HEARTBEAT_PING.to_string(), value: Value::Bool(true) }
    }
}

impl Default for WidgetState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_open_marks_alive() {
        let state = WidgetState::new();
        assert!(!state.is_alive());
        state.on_comm_open("comm-1".to_string());
        assert!(state.is_alive());
        assert_eq!(state.comm_id(), Some("comm-1".to_string()));
    }

    #[test]
    fn needs_heartbeat_true_before_any_traffic() {
        let state = WidgetState::new();
        assert!(state.needs_heartbeat(std::time::Duration::from_secs(10)));
    }

    #[test]
    fn dispatch_routes_pong_without_forwarding() {
        let state = WidgetState::new();
        let envelope = WidgetEnvelope { address: ADDR_HEARTBEAT_PONG.to_string(), value: Value::Bool(true) };
        assert!(state.dispatch(&envelope));
        assert!(state.is_alive());
    }

    #[test]
    fn dispatch_forwards_to_subscriber() {
        let state = WidgetState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.subscribe(vec!["plot/1".to_string()], tx);
        let envelope = WidgetEnvelope { address: "plot/1".to_string(), value: json!({"x": 1}) };
        assert!(!state.dispatch(&envelope));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.address, "plot/1");
    }

    #[test]
    fn unsubscribe_all_stops_forwarding() {
        let state = WidgetState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.subscribe(vec!["plot/1".to_string()], tx);
        state.unsubscribe_all(&["plot/1".to_string()]);
        let envelope = WidgetEnvelope { address: "plot/1".to_string(), value: json!(null) };
        state.dispatch(&envelope);
        assert!(rx.try_recv().is_err());
    }
}
