// ABOUTME: russh server handler for one client connection.
// ABOUTME: Bridges auth callbacks to the policy and channel callbacks to the channel table.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use crate::auth::{AuthContext, AuthDecision, AuthMethod, AuthenticationPolicy};
use crate::channel::{ChannelTable, SESSION_CHANNEL};
use crate::config::DEFAULT_MAX_AUTH_TRIES;
use crate::dispatch::{ChannelRequest, Disposition};
use crate::shell::{ShellEmulator, ShellOutput};
use crate::version::ClientVersion;
use async_trait::async_trait;
use russh::keys::PublicKey;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty, Sig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Shell output written through the session handle.
pub struct ChannelOutput {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl ShellOutput for ChannelOutput {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(data))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "channel closed"))
    }

    async fn close(&mut self) {
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }
}

/// Per-connection handler state.
pub struct ConnectionHandler {
    remote: SocketAddr,
    client_version: ClientVersion,
    policy: Arc<dyn AuthenticationPolicy>,
    sink: Arc<dyn AuditSink>,
    banner: Option<String>,
    channels: ChannelTable<ChannelId>,
    /// Public key decisions already made, keyed by (user, fingerprint).
    key_decisions: HashMap<(String, String), bool>,
    max_auth_attempts: usize,
    failures: usize,
    /// The first "none" attempt is a method probe and costs nothing.
    none_probed: bool,
}

impl ConnectionHandler {
    pub fn new(
        remote: SocketAddr,
        client_version: ClientVersion,
        policy: Arc<dyn AuthenticationPolicy>,
        sink: Arc<dyn AuditSink>,
        banner: Option<String>,
    ) -> Self {
        Self {
            remote,
            client_version,
            policy,
            channels: ChannelTable::new(remote, sink.clone()),
            sink,
            banner,
            key_decisions: HashMap::new(),
            max_auth_attempts: DEFAULT_MAX_AUTH_TRIES,
            failures: 0,
            none_probed: false,
        }
    }

    /// Denied attempts allowed before the connection is dropped.
    pub fn with_max_auth_attempts(mut self, max_auth_attempts: usize) -> Self {
        self.max_auth_attempts = max_auth_attempts;
        self
    }

    fn auth(&mut self, method: AuthMethod, decision: AuthDecision) -> Result<Auth, russh::Error> {
        match decision {
            AuthDecision::Allow => Ok(Auth::Accept),
            AuthDecision::DenyExplicit(reason) => {
                debug!(remote = %self.remote, "{reason}");
                self.deny(method)
            }
            AuthDecision::DenySilent => self.deny(method),
        }
    }

    /// Count a denied attempt. Reaching the limit ends the connection.
    fn deny(&mut self, method: AuthMethod) -> Result<Auth, russh::Error> {
        if method == AuthMethod::None && self.failures == 0 && !self.none_probed {
            self.none_probed = true;
            return Ok(reject());
        }

        self.failures += 1;
        if self.failures >= self.max_auth_attempts {
            self.sink.emit(AuditEvent::ssh(
                EventKind::SysRunning,
                Severity::Debug,
                Some(self.remote),
                format!("too many authentication failures ({})", self.failures),
            ));
            return Err(russh::Error::Disconnect);
        }
        Ok(reject())
    }

    /// Decide a public key once per user, whether it arrives as a query or signed.
    /// Only the first decision for a key counts as an attempt.
    fn check_key(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, russh::Error> {
        let fingerprint = spot_ssh::compute_fingerprint(public_key);
        let key = (user.to_string(), fingerprint);
        if let Some(&allowed) = self.key_decisions.get(&key) {
            return Ok(if allowed { Auth::Accept } else { reject() });
        }

        let ctx = AuthContext {
            user,
            remote: self.remote,
            client_version: self.client_version.get(),
        };
        let decision = self.policy.check_public_key(&ctx, &key.1);
        self.key_decisions.insert(key, decision.is_allow());
        self.auth(AuthMethod::PublicKey, decision)
    }

    fn request(&mut self, channel: ChannelId, request: ChannelRequest, session: &mut Session) {
        match self.channels.dispatch(channel, request) {
            Disposition::Acknowledge => self.reply(channel, session),
            Disposition::SpawnShell => {
                self.spawn_shell(channel, session);
                self.reply(channel, session);
            }
            Disposition::Close => {
                if let Err(e) = session.close(channel) {
                    self.warn(format!("close channel failed ({e})"));
                }
            }
            Disposition::Ignore => {}
        }
    }

    /// Sends success only when the client asked for a reply.
    fn reply(&self, channel: ChannelId, session: &mut Session) {
        if let Err(e) = session.channel_success(channel) {
            self.warn(format!("request reply failed ({e})"));
        }
    }

    fn spawn_shell(&mut self, channel: ChannelId, session: &mut Session) {
        let Some(input) = self.channels.attach_shell(channel) else {
            return;
        };
        let output = ChannelOutput {
            handle: session.handle(),
            channel,
        };
        let shell = ShellEmulator::new(self.remote, self.sink.clone(), input, output);
        tokio::spawn(shell.run());
    }

    fn warn(&self, message: String) {
        self.sink.emit(AuditEvent::ssh(
            EventKind::SysRunning,
            Severity::Warn,
            Some(self.remote),
            message,
        ));
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn authentication_banner(&mut self) -> Result<Option<String>, Self::Error> {
        Ok(self.banner.clone())
    }

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        let ctx = AuthContext {
            user,
            remote: self.remote,
            client_version: self.client_version.get(),
        };
        let decision = self.policy.check_none(&ctx);
        self.auth(AuthMethod::None, decision)
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let ctx = AuthContext {
            user,
            remote: self.remote,
            client_version: self.client_version.get(),
        };
        let decision = self.policy.check_password(&ctx, password);
        self.auth(AuthMethod::Password, decision)
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.check_key(user, public_key)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.check_key(user, public_key)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.channels.open(channel.id(), SESSION_CHANNEL))
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.channels.open(channel.id(), "x11"))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.channels.open(channel.id(), "direct-tcpip"))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.channels.open(channel.id(), "forwarded-tcpip"))
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Exec {
            command: data.to_vec(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(channel, ChannelRequest::Shell, session);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::PtyAllocate {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::SetEnv {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::PtyResize {
            cols: col_width,
            rows: row_height,
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(remote = %self.remote, subsystem = %name, "subsystem requested");
        let request = ChannelRequest::Other {
            kind: "subsystem".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Other {
            kind: "x11-req".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(remote = %self.remote, signal = ?signal, "signal received");
        let request = ChannelRequest::Other {
            kind: "signal".to_string(),
        };
        self.request(channel, request, session);
        Ok(())
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let request = ChannelRequest::Other {
            kind: "auth-agent-req@openssh.com".to_string(),
        };
        Ok(self.channels.dispatch(channel, request) == Disposition::Acknowledge)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.input(channel, data);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.end_input(channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(channel);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(remote = %self.remote, "discard tcpip-forward request for {address}:{port}");
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(false)
    }
}
