// ABOUTME: Transport listener: binds the socket and runs one russh session per connection.
// ABOUTME: Also wires config, host keys, policy and sink together for the binary.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use crate::auth::{AuthMethod, AuthenticationPolicy, StaticPolicy};
use crate::config::Config;
use crate::error::{Result, SpotError};
use crate::handler::ConnectionHandler;
use crate::version::VersionTap;
use russh::{MethodKind, MethodSet, SshId};
use spot_ssh::ServerIdentity;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;

/// Delay before answering a failed authentication attempt.
pub const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

/// Handshake settings shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub server_version: String,
    pub max_auth_attempts: usize,
    /// Sent after key exchange, before authentication completes.
    pub banner: Option<String>,
    pub auth_rejection_time: Duration,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_version: config.server_version.clone(),
            max_auth_attempts: config.max_auth_attempts(),
            banner: config.banner_line(),
            auth_rejection_time: AUTH_REJECTION_TIME,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn method_kind(method: AuthMethod) -> MethodKind {
    match method {
        AuthMethod::None => MethodKind::None,
        AuthMethod::Password => MethodKind::Password,
        AuthMethod::PublicKey => MethodKind::PublicKey,
    }
}

fn transport_config(
    identities: Vec<ServerIdentity>,
    settings: &ServerSettings,
    methods: &[AuthMethod],
) -> russh::server::Config {
    let kinds: Vec<MethodKind> = methods.iter().copied().map(method_kind).collect();
    russh::server::Config {
        server_id: SshId::Standard(settings.server_version.clone()),
        methods: MethodSet::from(&kinds[..]),
        // ConnectionHandler counts attempts and drops the connection itself.
        max_auth_attempts: usize::MAX,
        auth_rejection_time: settings.auth_rejection_time,
        auth_rejection_time_initial: Some(Duration::ZERO),
        keys: identities
            .into_iter()
            .map(ServerIdentity::into_private_key)
            .collect(),
        ..Default::default()
    }
}

/// A bound listener ready to accept clients.
pub struct Listener {
    listener: TcpListener,
    config: Arc<russh::server::Config>,
    policy: Arc<dyn AuthenticationPolicy>,
    sink: Arc<dyn AuditSink>,
    banner: Option<String>,
    max_auth_attempts: usize,
}

impl Listener {
    /// Bind `addr`. Failure to bind is fatal to the caller.
    pub async fn bind(
        addr: SocketAddr,
        identities: Vec<ServerIdentity>,
        settings: ServerSettings,
        policy: Arc<dyn AuthenticationPolicy>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        if identities.is_empty() {
            return Err(SpotError::Config("must specify at least one host key".into()));
        }
        let config = transport_config(identities, &settings, &policy.enabled_methods());
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SpotError::Bind { addr, source: e })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            policy,
            sink,
            banner: settings.banner,
            max_auth_attempts: settings.max_auth_attempts,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Returns only on an accept error.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                accepted = self.listener.accept() => {
                    let (stream, remote) = accepted?;
                    self.spawn(stream, remote);
                }
            }
        }
    }

    fn spawn(&self, stream: TcpStream, remote: SocketAddr) {
        let config = self.config.clone();
        let policy = self.policy.clone();
        let sink = self.sink.clone();
        let banner = self.banner.clone();
        let max_auth_attempts = self.max_auth_attempts;

        tokio::spawn(async move {
            let (stream, client_version) = VersionTap::new(stream);
            let handler =
                ConnectionHandler::new(remote, client_version, policy, sink.clone(), banner)
                    .with_max_auth_attempts(max_auth_attempts);

            let outcome = match russh::server::run_stream(config, stream, handler).await {
                Ok(session) => session.await.map_err(|e| format!("connection closed: {e}")),
                Err(e) => Err(format!("handshake failed: {e}")),
            };
            if let Err(message) = outcome {
                // Usually the client went away.
                sink.emit(AuditEvent::ssh(
                    EventKind::SysRunning,
                    Severity::Debug,
                    Some(remote),
                    message,
                ));
            }
        });
    }
}

/// Bind and serve until an accept error.
pub async fn listen(
    bind_address: SocketAddr,
    identities: Vec<ServerIdentity>,
    settings: ServerSettings,
    policy: Arc<dyn AuthenticationPolicy>,
    sink: Arc<dyn AuditSink>,
) -> Result<()> {
    Listener::bind(bind_address, identities, settings, policy, sink)
        .await?
        .run()
        .await
}

/// Load host keys, bind, and serve until Ctrl+C or SIGTERM.
pub async fn run(config: &Config, sink: Arc<dyn AuditSink>) -> Result<()> {
    let identities = spot_ssh::load_or_create(&config.host_keys, config.host_key_algorithm)?;

    let policy = StaticPolicy::from_config(config, sink.clone());
    policy.announce();

    let listener = Listener::bind(
        config.bind_addr()?,
        identities,
        ServerSettings::from_config(config),
        Arc::new(policy),
        sink.clone(),
    )
    .await?;

    sink.emit(AuditEvent::system(
        EventKind::SysInit,
        Severity::Info,
        format!("SSH server is listening on {}", listener.local_addr()?),
    ));

    let stop = {
        let sink = sink.clone();
        async move {
            let reason = shutdown_signal().await;
            sink.emit(AuditEvent::system(
                EventKind::SysRunning,
                Severity::Info,
                format!("Received {reason}, shutting down..."),
            ));
        }
    };
    listener.run_until(stop).await
}

/// Wait for Ctrl+C or SIGTERM and name the one received.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
