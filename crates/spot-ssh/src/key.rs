// ABOUTME: Host key loading and generation for the SSH server identity.
// ABOUTME: Loads persisted keys or creates RSA/ed25519 keys with owner-only permissions.

use crate::error::{IdentityError, Result};
use crate::fingerprint::compute_fingerprint;
use russh::keys::ssh_key::private::{KeypairData, RsaKeypair};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::{Algorithm, LineEnding};
use russh::keys::PrivateKey;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Modulus size for generated RSA host keys.
pub const RSA_KEY_BITS: usize = 4096;

/// Algorithm used when a host key has to be generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// RSA with a 4096-bit modulus.
    #[default]
    Rsa,
    /// Ed25519.
    Ed25519,
}

/// A host key the server presents during key exchange.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    path: PathBuf,
    key: PrivateKey,
    fingerprint: String,
}

impl ServerIdentity {
    fn new(path: &Path, key: PrivateKey) -> Self {
        let fingerprint = compute_fingerprint(key.public_key());
        Self {
            path: path.to_path_buf(),
            key,
            fingerprint,
        }
    }

    /// File the key was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SSH algorithm name of the key, e.g. `ssh-rsa`.
    pub fn algorithm(&self) -> String {
        self.key.algorithm().as_str().to_string()
    }

    /// OpenSSH-style SHA256 fingerprint of the public half.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.key
    }

    pub fn into_private_key(self) -> PrivateKey {
        self.key
    }
}

/// Load an existing private key from disk.
///
/// Accepts OpenSSH, PKCS#1 (`RSA PRIVATE KEY`) and PKCS#8 PEM encodings.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_key(key_path: &Path) -> Result<PrivateKey> {
    let key_data = std::fs::read_to_string(key_path).map_err(|e| IdentityError::ReadKey {
        path: key_path.to_path_buf(),
        source: e,
    })?;

    russh::keys::decode_secret_key(&key_data, None).map_err(|e| IdentityError::ParseKey {
        path: key_path.to_path_buf(),
        source: e,
    })
}

/// Generate a new host key and save it to disk.
///
/// Creates the parent directory (0700) if needed and writes the private key
/// with 0600 permissions. Also writes the public key with `.pub` extension.
///
/// # Errors
/// Returns an error if directory creation, key generation, or file writing fails.
pub fn generate_key(key_path: &Path, algorithm: KeyAlgorithm) -> Result<PrivateKey> {
    info!("Generating host key: {}", key_path.display());

    if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_key_dir(parent)?;
    }

    let private_key = match algorithm {
        KeyAlgorithm::Rsa => {
            let keypair =
                RsaKeypair::random(&mut OsRng, RSA_KEY_BITS).map_err(IdentityError::GenerateKey)?;
            PrivateKey::new(KeypairData::from(keypair), "").map_err(IdentityError::GenerateKey)?
        }
        KeyAlgorithm::Ed25519 => PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(IdentityError::GenerateKey)?,
    };

    let private_key_str = private_key
        .to_openssh(LineEnding::LF)
        .map_err(IdentityError::SerializeKey)?;

    write_private_key(key_path, private_key_str.as_bytes()).map_err(|e| IdentityError::WriteKey {
        path: key_path.to_path_buf(),
        source: e,
    })?;

    let pub_key_path = key_path.with_extension("pub");
    let public_key_str = private_key
        .public_key()
        .to_openssh()
        .map_err(IdentityError::SerializeKey)?;

    std::fs::write(&pub_key_path, public_key_str.as_bytes()).map_err(|e| {
        IdentityError::WriteKey {
            path: pub_key_path.clone(),
            source: e,
        }
    })?;

    Ok(private_key)
}

/// Create the key file with 0600 (rw-------) from the start. Never replaces a file.
fn write_private_key(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn create_key_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(|e| IdentityError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })
}

/// Load an existing host key or generate a new one if it doesn't exist.
///
/// # Errors
/// Returns an error if key loading fails (for existing keys) or generation fails.
pub fn load_or_generate_key(key_path: &Path, algorithm: KeyAlgorithm) -> Result<ServerIdentity> {
    let key = if key_path.exists() {
        load_key(key_path)?
    } else {
        error!("host key file not exist: {}", key_path.display());
        generate_key(key_path, algorithm)?
    };
    Ok(ServerIdentity::new(key_path, key))
}

/// Load every configured host key, generating the missing ones.
///
/// At least one path is required; a server without an identity cannot
/// complete key exchange.
///
/// # Errors
/// Returns `IdentityError::NoIdentities` for an empty path list, or the first
/// load/generate failure.
pub fn load_or_create(paths: &[PathBuf], algorithm: KeyAlgorithm) -> Result<Vec<ServerIdentity>> {
    if paths.is_empty() {
        return Err(IdentityError::NoIdentities);
    }

    paths
        .iter()
        .map(|path| {
            let identity = load_or_generate_key(path, algorithm)?;
            debug!(
                "load host key: [{}] = {}|{}",
                path.display(),
                identity.algorithm(),
                identity.fingerprint()
            );
            Ok(identity)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_and_load_key() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_path = temp_dir.path().join("host.key");

        let generated =
            generate_key(&key_path, KeyAlgorithm::Ed25519).expect("should generate key");

        assert!(key_path.exists(), "private key should exist");
        assert!(
            key_path.with_extension("pub").exists(),
            "public key should exist"
        );

        let loaded = load_key(&key_path).expect("should load key");
        assert_eq!(
            compute_fingerprint(generated.public_key()),
            compute_fingerprint(loaded.public_key()),
            "loaded key should match generated key"
        );
    }

    #[test]
    fn test_load_or_create_twice_generates_once() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_path = temp_dir.path().join("keys").join("host.key");
        let paths = vec![key_path.clone()];

        let first = load_or_create(&paths, KeyAlgorithm::Ed25519).expect("first call");
        let written = std::fs::read_to_string(&key_path).expect("key persisted");

        let second = load_or_create(&paths, KeyAlgorithm::Ed25519).expect("second call");
        let after = std::fs::read_to_string(&key_path).expect("key still there");

        assert_eq!(first[0].fingerprint(), second[0].fingerprint());
        assert_eq!(written, after, "second call must not rewrite the key");
    }

    #[test]
    fn test_load_or_create_rejects_empty_paths() {
        let result = load_or_create(&[], KeyAlgorithm::Ed25519);
        assert!(matches!(result, Err(IdentityError::NoIdentities)));
    }

    #[test]
    fn test_load_or_create_multiple_paths() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let paths = vec![
            temp_dir.path().join("a.key"),
            temp_dir.path().join("b.key"),
        ];

        let identities = load_or_create(&paths, KeyAlgorithm::Ed25519).expect("should load");

        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].path(), paths[0].as_path());
        assert_ne!(identities[0].fingerprint(), identities[1].fingerprint());
        assert_eq!(identities[1].algorithm(), "ssh-ed25519");
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_dir = temp_dir.path().join("nested");
        let key_path = key_dir.join("secure_key");

        generate_key(&key_path, KeyAlgorithm::Ed25519).expect("should generate key");

        let mode = std::fs::metadata(&key_path)
            .expect("should read metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600, "private key should have 0600 permissions");

        let dir_mode = std::fs::metadata(&key_dir)
            .expect("should read dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode & 0o077, 0, "key directory should be owner-only");
    }

    #[cfg(unix)]
    #[test]
    fn test_key_in_existing_directory_is_never_group_readable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("should create temp dir");
        std::fs::set_permissions(temp_dir.path(), std::fs::Permissions::from_mode(0o755))
            .expect("should open up directory");
        let key_path = temp_dir.path().join("host.key");

        generate_key(&key_path, KeyAlgorithm::Ed25519).expect("should generate key");

        let mode = std::fs::metadata(&key_path)
            .expect("should read metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_generate_key_never_replaces_a_file() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_path = temp_dir.path().join("host.key");
        std::fs::write(&key_path, "keep me").expect("write");

        let result = generate_key(&key_path, KeyAlgorithm::Ed25519);

        assert!(matches!(result, Err(IdentityError::WriteKey { .. })));
        assert_eq!(std::fs::read_to_string(&key_path).expect("read"), "keep me");
    }

    #[test]
    fn test_load_key_file_not_found() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let result = load_key(&temp_dir.path().join("nonexistent_key"));
        assert!(matches!(result, Err(IdentityError::ReadKey { .. })));
    }

    #[test]
    fn test_existing_invalid_key_is_not_replaced() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_path = temp_dir.path().join("invalid_key");
        std::fs::write(&key_path, "not a valid ssh key").expect("should write file");

        let result = load_or_create(&[key_path.clone()], KeyAlgorithm::Ed25519);

        assert!(matches!(result, Err(IdentityError::ParseKey { .. })));
        assert_eq!(
            std::fs::read_to_string(&key_path).expect("still readable"),
            "not a valid ssh key"
        );
    }

    #[test]
    #[ignore = "4096-bit RSA generation is slow in debug builds"]
    fn test_generated_rsa_key_has_4096_bit_modulus() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let key_path = temp_dir.path().join("rsa_key");

        let key = generate_key(&key_path, KeyAlgorithm::Rsa).expect("should generate key");
        let rsa = key.public_key().key_data().rsa().expect("rsa key");
        let modulus = rsa.n.as_positive_bytes().expect("positive modulus");

        assert_eq!(modulus.len() * 8, RSA_KEY_BITS);
    }
}
