// ABOUTME: Error types for host key operations using thiserror.
// ABOUTME: Provides typed errors for key loading, generation, and persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or creating server identities.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No host key paths were configured.
    #[error("must specify at least one host key")]
    NoIdentities,

    /// Failed to read a key file from disk.
    #[error("failed to read host key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a host key.
    #[error("failed to parse host key from {path}: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    /// Failed to generate a host key.
    #[error("failed to generate host key: {0}")]
    GenerateKey(#[source] russh::keys::ssh_key::Error),

    /// Failed to serialize a key.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] russh::keys::ssh_key::Error),

    /// Failed to write a key file to disk.
    #[error("failed to write key to {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using IdentityError.
pub type Result<T> = std::result::Result<T, IdentityError>;
