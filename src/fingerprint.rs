//! Content fingerprints
//!
//! A fingerprint is the MD5 digest of a resource's bytes rendered the way
//! existing sidecar records store it: lower-case hex of the digest read as an
//! unsigned big-endian integer, so leading zero nibbles are dropped.
//!
//! Fingerprints only detect edits the sidecar status does not already
//! announce; they carry no security meaning.

use crate::error::Result;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::trace;

const BUFFER_SIZE: usize = 8192;

/// Fingerprint everything a reader yields
///
/// # Errors
///
/// Returns the reader's I/O error unchanged.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(render(&hasher.finalize()))
}

/// Fingerprint a file's content
///
/// # Arguments
///
/// * `path` - Resource file to read
///
/// # Returns
///
/// The digest as stored in the `md5` sidecar attribute.
///
/// # Errors
///
/// - [`SyncError::Io`](crate::SyncError::Io) if the file cannot be opened or read
///
/// # Example
///
/// ```rust,no_run
/// use regsync::fingerprint::fingerprint_file;
/// use std::path::Path;
///
/// # fn main() -> regsync::Result<()> {
/// let digest = fingerprint_file(Path::new("a.txt"))?;
/// println!("md5: {}", digest);
/// # Ok(())
/// # }
/// ```
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let digest = fingerprint_reader(file)?;
    trace!("Fingerprinted {:?}: {}", path, digest);
    Ok(digest)
}

/// Fingerprint an in-memory buffer
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    render(&hasher.finalize())
}

fn render(digest: &[u8]) -> String {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(digest);
    format!("{:x}", u128::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        assert_eq!(fingerprint_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_leading_zeros_are_dropped() {
        // md5("jk8ssl") = 0000000018e6137ac2caab16074784a6
        let digest = fingerprint_bytes(b"jk8ssl");
        assert_eq!(digest, "18e6137ac2caab16074784a6");
    }

    #[test]
    fn test_file_matches_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(fingerprint_file(&path).unwrap(), fingerprint_bytes(&data));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = fingerprint_file(&temp_dir.path().join("absent"));
        assert!(matches!(result, Err(crate::SyncError::Io(_))));
    }
}
