//! Algorithm-tagged file checksums.
//!
//! Every stored version is fingerprinted as `<algorithm>:<lowercase hex>`.
//! The tag is part of the recorded value so that a future change of default
//! algorithm can still verify files written under the old one.

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use crate::error::{Error, ErrorKind, Result};

// Large enough to keep syscalls down on multi-megabyte PDFs, small enough
// that a store never holds more than this much of a file in memory.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm used to fingerprint stored files.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    #[display("sha256")]
    Sha256,
    #[display("blake3")]
    Blake3,
}

impl ChecksumAlgorithm {
    /// Length of the hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            // Both produce 256-bit digests.
            Self::Sha256 | Self::Blake3 => 64,
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => exn::bail!(ErrorKind::InvalidChecksum(other.to_string())),
        }
    }
}

/// A hex digest together with the algorithm that produced it.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{algorithm}:{hex}")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((tag, hex)) = s.split_once(':') else {
            exn::bail!(ErrorKind::InvalidChecksum(s.to_string()));
        };
        let Ok(algorithm) = tag.parse::<ChecksumAlgorithm>() else {
            exn::bail!(ErrorKind::InvalidChecksum(s.to_string()));
        };
        let valid_hex = hex.len() == algorithm.hex_len()
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid_hex {
            exn::bail!(ErrorKind::InvalidChecksum(s.to_string()));
        }
        Ok(Self { algorithm, hex: hex.to_string() })
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| serde::de::Error::custom(format!("invalid checksum `{s}`")))
    }
}

enum Hasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            },
        }
    }

    fn finalize(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Stream a file through `algorithm` and return its tagged checksum.
///
/// The file is read in fixed-size chunks; it is never fully buffered. Any
/// read error aborts the computation and is returned as-is, so a checksum is
/// either complete or absent.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), %algorithm))]
pub async fn checksum_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Checksum> {
    let mut file = File::open(path).await.map_err(|e| ErrorKind::io(e, path))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(|e| ErrorKind::io(e, path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Checksum { algorithm, hex: hasher.finalize() })
}

/// Recompute a file's checksum with the algorithm recorded in `expected`
/// and compare.
pub async fn verify_file(path: &Path, expected: &Checksum) -> Result<bool> {
    let actual = checksum_file(path, expected.algorithm).await?;
    Ok(actual == *expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    async fn write_temp(data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        tokio::fs::write(&path, data).await.unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_sha256_known_values() {
        let (_dir, path) = write_temp(b"").await;
        let checksum = checksum_file(&path, ChecksumAlgorithm::Sha256).await.unwrap();
        assert_eq!(checksum.to_string(), format!("sha256:{EMPTY_SHA256}"));

        let (_dir, path) = write_temp(b"hello world").await;
        let checksum = checksum_file(&path, ChecksumAlgorithm::Sha256).await.unwrap();
        assert_eq!(checksum.hex(), HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_blake3_matches_one_shot_hash() {
        let (_dir, path) = write_temp(b"hello world").await;
        let checksum = checksum_file(&path, ChecksumAlgorithm::Blake3).await.unwrap();
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Blake3);
        assert_eq!(checksum.hex(), blake3::hash(b"hello world").to_hex().as_str());
    }

    #[tokio::test]
    async fn test_streams_files_larger_than_buffer() {
        let data: Vec<u8> = (0..(READ_BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let (_dir, path) = write_temp(&data).await;
        let checksum = checksum_file(&path, ChecksumAlgorithm::Sha256).await.unwrap();
        assert_eq!(checksum.hex(), format!("{:x}", Sha256::digest(&data)));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = checksum_file(&dir.path().join("nope"), ChecksumAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verify_file() {
        let (_dir, path) = write_temp(b"hello world").await;
        let good: Checksum = format!("sha256:{HELLO_SHA256}").parse().unwrap();
        let bad: Checksum = format!("sha256:{EMPTY_SHA256}").parse().unwrap();
        assert!(verify_file(&path, &good).await.unwrap());
        assert!(!verify_file(&path, &bad).await.unwrap());
    }

    #[rstest]
    #[case("sha256")]
    #[case("sha256:")]
    #[case("md5:d41d8cd98f00b204e9800998ecf8427e")]
    #[case("sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855")]
    #[case("sha256:e3b0c442")]
    #[case(":e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Checksum>().is_err());
    }

    #[test]
    fn test_parse_and_display() {
        let input = format!("sha256:{EMPTY_SHA256}");
        let checksum: Checksum = input.parse().unwrap();
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(checksum.to_string(), input);
        assert_eq!(serde_json::to_string(&checksum).unwrap(), format!("\"{input}\""));
    }
}
