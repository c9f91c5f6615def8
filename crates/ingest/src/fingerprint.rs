use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 of a file via streaming reads (constant memory).
pub fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// The content fingerprint used as a document's identity key: ingesting the
/// same bytes twice always derives the same fingerprint.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    to_hex(&sha256_bytes(data))
}

pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    Ok(to_hex(&sha256_file(path)?))
}
