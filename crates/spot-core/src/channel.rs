// ABOUTME: Channel bookkeeping for one connection.
// ABOUTME: Accepts only session channels and tracks each open channel's dispatcher and shell input.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use crate::dispatch::{ChannelRequest, ChannelState, Disposition, RequestDispatcher};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const SESSION_CHANNEL: &str = "session";

/// State kept for an open session channel.
pub struct ChannelEntry {
    dispatcher: RequestDispatcher,
    shell_input: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// The open channels of one connection.
pub struct ChannelTable<K> {
    remote: SocketAddr,
    sink: Arc<dyn AuditSink>,
    channels: HashMap<K, ChannelEntry>,
}

impl<K: Eq + Hash + Copy> ChannelTable<K> {
    pub fn new(remote: SocketAddr, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            remote,
            sink,
            channels: HashMap::new(),
        }
    }

    /// Decide a channel-open request. Only `session` channels get an entry.
    pub fn open(&mut self, id: K, channel_type: &str) -> bool {
        if channel_type != SESSION_CHANNEL {
            self.sink.emit(AuditEvent::ssh(
                EventKind::SysRunning,
                Severity::Debug,
                Some(self.remote),
                format!("reject channel, type: {channel_type}"),
            ));
            return false;
        }
        let dispatcher = RequestDispatcher::new(self.remote, self.sink.clone());
        self.channels.insert(
            id,
            ChannelEntry {
                dispatcher,
                shell_input: None,
            },
        );
        true
    }

    /// Route a request to the channel's dispatcher. Unknown channels are ignored.
    pub fn dispatch(&mut self, id: K, request: ChannelRequest) -> Disposition {
        match self.channels.get_mut(&id) {
            Some(entry) => entry.dispatcher.dispatch(request),
            None => Disposition::Ignore,
        }
    }

    /// Create the input pipe for a shell about to start on `id`.
    pub fn attach_shell(&mut self, id: K) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        let entry = self.channels.get_mut(&id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.shell_input = Some(tx);
        Some(rx)
    }

    /// Forward client data to the channel's shell, if one is running.
    pub fn input(&mut self, id: K, data: &[u8]) {
        if let Some(tx) = self.channels.get(&id).and_then(|e| e.shell_input.as_ref()) {
            // A closed receiver means the shell already exited.
            let _ = tx.send(data.to_vec());
        }
    }

    /// Client sent EOF: end the shell's input.
    pub fn end_input(&mut self, id: K) {
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.shell_input = None;
        }
    }

    /// Channel is gone: drop its state, which also ends any shell input.
    pub fn remove(&mut self, id: K) {
        if let Some(mut entry) = self.channels.remove(&id) {
            entry.dispatcher.close();
        }
    }

    pub fn state(&self, id: K) -> Option<ChannelState> {
        self.channels.get(&id).map(|e| e.dispatcher.state())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
