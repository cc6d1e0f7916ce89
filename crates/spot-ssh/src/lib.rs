// ABOUTME: Host identity utilities for the spot SSH server.
// ABOUTME: Provides host key loading/generation and OpenSSH fingerprints.

//! # spot-ssh
//!
//! Host key management for the spot SSH honeypot.
//!
//! ## Features
//!
//! - **Identity loading**: load persisted host keys or generate new ones
//!   (RSA 4096 by default, ed25519 on request) with owner-only permissions
//! - **Fingerprinting**: OpenSSH-style `SHA256:` fingerprints for host and
//!   client keys
//!
//! ## Example
//!
//! ```no_run
//! use spot_ssh::{load_or_create, KeyAlgorithm};
//! use std::path::PathBuf;
//!
//! let paths = vec![PathBuf::from("host.key")];
//! let identities = load_or_create(&paths, KeyAlgorithm::Rsa).expect("host keys should load");
//! for identity in &identities {
//!     println!("{} {}", identity.algorithm(), identity.fingerprint());
//! }
//! ```

mod error;
mod fingerprint;
mod key;

pub use error::{IdentityError, Result};
pub use fingerprint::compute_fingerprint;
pub use key::{
    generate_key, load_key, load_or_create, load_or_generate_key, KeyAlgorithm, ServerIdentity,
    RSA_KEY_BITS,
};

// Re-export key types for convenience
pub use russh::keys::{PrivateKey, PublicKey};
