// ABOUTME: Per-channel request dispatcher.
// ABOUTME: Records each channel request and decides how the transport should answer it.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use std::net::SocketAddr;
use std::sync::Arc;

/// A request received on an open session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Exec { command: Vec<u8> },
    Shell,
    PtyAllocate { term: String, cols: u32, rows: u32 },
    SetEnv { name: String, value: String },
    PtyResize { cols: u32, rows: u32 },
    Other { kind: String },
}

/// What the transport must do after a request was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply success, if the client asked for a reply.
    Acknowledge,
    /// Start the shell emulator, then acknowledge.
    SpawnShell,
    /// Close the channel without replying.
    Close,
    /// Channel already closed; neither process nor reply.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

/// Interprets the ordered requests of one channel.
pub struct RequestDispatcher {
    remote: SocketAddr,
    sink: Arc<dyn AuditSink>,
    state: ChannelState,
    shell_started: bool,
}

impl RequestDispatcher {
    pub fn new(remote: SocketAddr, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            remote,
            sink,
            state: ChannelState::Open,
            shell_started: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Mark the channel closed, e.g. after the shell exited.
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    fn event(&self, kind: EventKind, severity: Severity, message: impl Into<String>) -> AuditEvent {
        AuditEvent::ssh(kind, severity, Some(self.remote), message)
    }

    pub fn dispatch(&mut self, request: ChannelRequest) -> Disposition {
        if self.state == ChannelState::Closed {
            return Disposition::Ignore;
        }

        match request {
            ChannelRequest::Exec { command } => {
                let command = match String::from_utf8(command) {
                    Ok(command) => command,
                    Err(e) => {
                        self.sink.emit(
                            self.event(
                                EventKind::SshExec,
                                Severity::Warn,
                                "exec payload decode failed",
                            )
                            .with_field("error", e.utf8_error().to_string()),
                        );
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                self.sink.emit(
                    self.event(EventKind::SshExec, Severity::Info, format!("exec:[{command}]"))
                        .with_field("command", command),
                );
                self.state = ChannelState::Closed;
                Disposition::Close
            }
            ChannelRequest::Shell => {
                if self.shell_started {
                    self.sink.emit(self.event(
                        EventKind::SshShell,
                        Severity::Debug,
                        "shell already running",
                    ));
                    return Disposition::Acknowledge;
                }
                self.shell_started = true;
                Disposition::SpawnShell
            }
            ChannelRequest::PtyAllocate { term, cols, rows } => {
                self.sink.emit(
                    self.event(EventKind::SshPtyReq, Severity::Debug, "pty request")
                        .with_field("term", term)
                        .with_field("cols", cols.to_string())
                        .with_field("rows", rows.to_string()),
                );
                Disposition::Acknowledge
            }
            ChannelRequest::SetEnv { name, value } => {
                self.sink.emit(
                    self.event(EventKind::SshEnv, Severity::Debug, "env request")
                        .with_field("name", name)
                        .with_field("value", value),
                );
                Disposition::Acknowledge
            }
            ChannelRequest::PtyResize { cols, rows } => {
                self.sink.emit(
                    self.event(EventKind::SshPtyReq, Severity::Debug, "window change")
                        .with_field("cols", cols.to_string())
                        .with_field("rows", rows.to_string()),
                );
                Disposition::Acknowledge
            }
            ChannelRequest::Other { kind } => {
                self.sink.emit(self.event(
                    EventKind::SshOther,
                    Severity::Debug,
                    format!("reject request, type: {kind}"),
                ));
                Disposition::Acknowledge
            }
        }
    }
}
