// ABOUTME: SSH public key fingerprint computation.
// ABOUTME: Produces OpenSSH-style SHA256 fingerprints for host and client keys.

use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;

/// Compute the SHA256 fingerprint of a public key.
///
/// The result uses the OpenSSH presentation, `SHA256:` followed by the
/// unpadded base64 digest of the key's wire encoding, as printed by
/// `ssh-keygen -lf`.
pub fn compute_fingerprint(public_key: &PublicKey) -> String {
    public_key.fingerprint(HashAlg::Sha256).to_string()
}
