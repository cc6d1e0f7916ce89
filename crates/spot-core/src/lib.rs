// ABOUTME: Session engine for the spot SSH honeypot.
// ABOUTME: Accepts SSH clients, records every credential and request, never executes anything.

//! # spot-core
//!
//! The listener completes real SSH handshakes, lets the authentication policy
//! decide each credential, and then plays along with session channels:
//! exec requests are recorded and closed, shell requests get a fake prompt
//! whose input lines are recorded, env and pty requests are recorded and
//! acknowledged. Everything observed is emitted as an [`AuditEvent`].
//!
//! ```no_run
//! use spot_core::{server, Config, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn start() -> spot_core::Result<()> {
//! let config = Config::load("config.yml".as_ref())?;
//! let sink = Arc::new(TracingSink::new(config.log.separate_port));
//! server::run(&config, sink).await
//! # }
//! ```

pub mod audit;
pub mod auth;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod server;
pub mod shell;
pub mod version;

pub use audit::{AuditEvent, AuditSink, EventKind, MemorySink, Severity, TracingSink};
pub use auth::{AuthContext, AuthDecision, AuthMethod, AuthenticationPolicy, StaticPolicy};
pub use config::{AuthMethodConfig, Config};
pub use error::{Result, ShellError, SpotError};
pub use server::{listen, Listener, ServerSettings};
