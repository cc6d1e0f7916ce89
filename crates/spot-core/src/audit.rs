// ABOUTME: Structured audit events and the sinks that record them.
// ABOUTME: Every observed client action becomes an AuditEvent emitted through an AuditSink.

use spot_log::{AUDIT_TARGET, SYSTEM_TARGET};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Fixed taxonomy of audit events. `as_str` is the `event` value in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SysInit,
    SysRunning,
    NoAuth,
    PasswordAuth,
    PublicKeyAuth,
    SshEnv,
    SshExec,
    SshShell,
    SshPtyReq,
    SshOther,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SysInit => "sys_init",
            EventKind::SysRunning => "sys_running",
            EventKind::NoAuth => "no_auth",
            EventKind::PasswordAuth => "password_auth",
            EventKind::PublicKeyAuth => "public_key_auth",
            EventKind::SshEnv => "ssh_env",
            EventKind::SshExec => "ssh_exec",
            EventKind::SshShell => "ssh_shell",
            EventKind::SshPtyReq => "ssh_pty_req",
            EventKind::SshOther => "ssh_other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Whether an event describes the process (`sys`) or a client connection (`ssh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    System,
    Ssh,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::System => "sys",
            Scope::Ssh => "ssh",
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    kind: EventKind,
    scope: Scope,
    severity: Severity,
    remote: Option<SocketAddr>,
    message: String,
    fields: BTreeMap<&'static str, String>,
}

impl AuditEvent {
    /// A process-level event (`type = sys`).
    pub fn system(kind: EventKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Scope::System,
            severity,
            remote: None,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// A connection-level event (`type = ssh`).
    pub fn ssh(
        kind: EventKind,
        severity: Severity,
        remote: Option<SocketAddr>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            scope: Scope::Ssh,
            severity,
            remote,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.insert(name, value.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Field names with a dedicated slot in the log record. Anything else is
/// folded into `extra`.
const KNOWN_FIELDS: &[&str] = &[
    "user",
    "password",
    "key_fingerprint",
    "client_version",
    "command",
    "name",
    "value",
    "line",
    "term",
    "cols",
    "rows",
    "error",
];

/// Emits audit events as `tracing` events.
///
/// Connection events go to [`AUDIT_TARGET`], process events to
/// [`SYSTEM_TARGET`], so a file layer can keep only the former.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    separate_port: bool,
}

impl TracingSink {
    pub fn new(separate_port: bool) -> Self {
        Self { separate_port }
    }

    fn address(&self, remote: Option<SocketAddr>) -> (Option<String>, Option<u16>) {
        match remote {
            Some(addr) if self.separate_port => (Some(addr.ip().to_string()), Some(addr.port())),
            Some(addr) => (Some(addr.to_string()), None),
            None => (None, None),
        }
    }
}

macro_rules! audit_event {
    ($target:expr, $level:expr, $ev:expr, $ip:expr, $port:expr, $extra:expr) => {
        tracing::event!(
            target: $target,
            $level,
            r#type = $ev.scope().as_str(),
            event = $ev.kind().as_str(),
            ip = $ip,
            port = $port,
            user = $ev.field("user"),
            password = $ev.field("password"),
            key_fingerprint = $ev.field("key_fingerprint"),
            client_version = $ev.field("client_version"),
            command = $ev.field("command"),
            name = $ev.field("name"),
            value = $ev.field("value"),
            line = $ev.field("line"),
            term = $ev.field("term"),
            cols = $ev.field("cols"),
            rows = $ev.field("rows"),
            error = $ev.field("error"),
            extra = $extra,
            "{}",
            $ev.message()
        )
    };
}

macro_rules! audit_at_severity {
    ($target:expr, $ev:expr, $ip:expr, $port:expr, $extra:expr) => {
        match $ev.severity() {
            Severity::Debug => {
                audit_event!($target, tracing::Level::DEBUG, $ev, $ip, $port, $extra)
            }
            Severity::Info => {
                audit_event!($target, tracing::Level::INFO, $ev, $ip, $port, $extra)
            }
            Severity::Warn => {
                audit_event!($target, tracing::Level::WARN, $ev, $ip, $port, $extra)
            }
            Severity::Error => {
                audit_event!($target, tracing::Level::ERROR, $ev, $ip, $port, $extra)
            }
        }
    };
}

impl AuditSink for TracingSink {
    fn emit(&self, event: AuditEvent) {
        let (ip, port) = self.address(event.remote());
        let ip = ip.as_deref();
        let extra = extra_fields(&event);
        let extra = extra.as_deref();

        match event.scope() {
            Scope::Ssh => audit_at_severity!(AUDIT_TARGET, event, ip, port, extra),
            Scope::System => audit_at_severity!(SYSTEM_TARGET, event, ip, port, extra),
        }
    }
}

fn extra_fields(event: &AuditEvent) -> Option<String> {
    let extra: Vec<String> = event
        .fields()
        .filter(|(name, _)| !KNOWN_FIELDS.contains(name))
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    if extra.is_empty() {
        None
    } else {
        Some(extra.join(" "))
    }
}

/// Keeps events in memory. Used by tests and embedders that inspect activity.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
