// ABOUTME: Authentication policy engine.
// ABOUTME: Decides each credential attempt from static flags and records it as an audit event.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use crate::config::{AuthMethodConfig, Config};
use std::net::SocketAddr;
use std::sync::Arc;

/// Credential kinds a client may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    Password,
    PublicKey,
}

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// Refused; the reason goes to the diagnostic log, never to the client.
    DenyExplicit(String),
    /// Refused without a reason; the client just tries the next method.
    DenySilent,
}

impl AuthDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }
}

/// Who is attempting to authenticate.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub user: &'a str,
    pub remote: SocketAddr,
    pub client_version: Option<&'a str>,
}

impl AuthContext<'_> {
    fn version(&self) -> &str {
        self.client_version.unwrap_or("")
    }
}

/// Decides authentication attempts. One method per credential kind.
pub trait AuthenticationPolicy: Send + Sync {
    /// Methods to offer during negotiation. Disabled methods are never offered.
    fn enabled_methods(&self) -> Vec<AuthMethod>;

    fn check_none(&self, ctx: &AuthContext<'_>) -> AuthDecision;

    fn check_password(&self, ctx: &AuthContext<'_>, password: &str) -> AuthDecision;

    fn check_public_key(&self, ctx: &AuthContext<'_>, fingerprint: &str) -> AuthDecision;
}

/// Policy driven by the static enable/accept flags of the config.
pub struct StaticPolicy {
    none: AuthMethodConfig,
    password: AuthMethodConfig,
    public_key: AuthMethodConfig,
    sink: Arc<dyn AuditSink>,
}

impl StaticPolicy {
    pub fn new(
        none: AuthMethodConfig,
        password: AuthMethodConfig,
        public_key: AuthMethodConfig,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            none,
            password,
            public_key,
            sink,
        }
    }

    pub fn from_config(config: &Config, sink: Arc<dyn AuditSink>) -> Self {
        Self::new(
            config.no_auth(),
            config.password_auth,
            config.public_key_auth,
            sink,
        )
    }

    /// Log the startup state of each method.
    pub fn announce(&self) {
        for (method, settings) in [
            ("no auth connection", self.none),
            ("password auth", self.password),
            ("public key auth", self.public_key),
        ] {
            if settings.enable {
                self.sink.emit(AuditEvent::system(
                    EventKind::SysInit,
                    Severity::Debug,
                    format!("enable {method}"),
                ));
            }
        }
    }

    fn record(&self, kind: EventKind, ctx: &AuthContext<'_>, accept: bool) -> AuditEvent {
        let verdict = if accept { "permit" } else { "reject" };
        AuditEvent::ssh(
            kind,
            Severity::Info,
            Some(ctx.remote),
            format!("{verdict} client: {}", ctx.version()),
        )
        .with_field("user", ctx.user)
        .with_field("client_version", ctx.version())
    }
}

impl AuthenticationPolicy for StaticPolicy {
    fn enabled_methods(&self) -> Vec<AuthMethod> {
        [
            (AuthMethod::None, self.none),
            (AuthMethod::Password, self.password),
            (AuthMethod::PublicKey, self.public_key),
        ]
        .into_iter()
        .filter(|(_, settings)| settings.enable)
        .map(|(method, _)| method)
        .collect()
    }

    fn check_none(&self, ctx: &AuthContext<'_>) -> AuthDecision {
        if !self.none.enable {
            return AuthDecision::DenySilent;
        }
        self.sink.emit(self.record(EventKind::NoAuth, ctx, self.none.accept));
        if self.none.accept {
            AuthDecision::Allow
        } else {
            AuthDecision::DenySilent
        }
    }

    fn check_password(&self, ctx: &AuthContext<'_>, password: &str) -> AuthDecision {
        if !self.password.enable {
            return AuthDecision::DenySilent;
        }
        self.sink.emit(
            self.record(EventKind::PasswordAuth, ctx, self.password.accept)
                .with_field("password", password),
        );
        if self.password.accept {
            AuthDecision::Allow
        } else {
            AuthDecision::DenyExplicit(format!("password rejected for [{}]", ctx.user))
        }
    }

    fn check_public_key(&self, ctx: &AuthContext<'_>, fingerprint: &str) -> AuthDecision {
        if !self.public_key.enable {
            return AuthDecision::DenySilent;
        }
        self.sink.emit(
            self.record(EventKind::PublicKeyAuth, ctx, self.public_key.accept)
                .with_field("key_fingerprint", fingerprint),
        );
        if self.public_key.accept {
            AuthDecision::Allow
        } else {
            AuthDecision::DenyExplicit(format!("unknown public key for [{}]", ctx.user))
        }
    }
}
