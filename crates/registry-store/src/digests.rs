use data_encoding::HEXLOWER;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;

/// Length, in bytes, of a SHA-1 digest.
pub const FP_LEN: usize = 20;
/// Length, in bytes, of a SHA-256 digest.
pub const BLOB_DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl std::error::Error for Error {}

/// A block fingerprint: `SHA1(block_bytes)`, used only as an internal,
/// non-adversarial dedup key. Never exposed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockFp([u8; FP_LEN]);

impl BlockFp {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        Self(digest.into())
    }

    pub fn as_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    /// Parses a lowercase-hex-encoded fingerprint, as found in a block's
    /// filename or a recipe's `chunks` array.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        if s.len() != FP_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error(format!("invalid block fingerprint: {s:?}")));
        }
        let decoded = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| Error(e.to_string()))?;
        Ok(Self(decoded.try_into().expect("length checked above")))
    }
}

impl fmt::Display for BlockFp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl serde::Serialize for BlockFp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> serde::Deserialize<'de> for BlockFp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A blob's content digest: `"sha256:" + hex(SHA256(content))`. This is the
/// only digest form visible across the registry's HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobDigest([u8; BLOB_DIGEST_LEN]);

impl BlobDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    /// The hex part only, used as the directory name under `layers/`.
    pub fn as_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    /// Parses a `sha256:<64-lowercase-hex>` string. This is the one place
    /// `MalformedDigest` (§7) originates.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let hex = s
            .strip_prefix("sha256:")
            .ok_or_else(|| Error(format!("digest {s:?} missing sha256: prefix")))?;
        if hex.len() != BLOB_DIGEST_LEN * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error(format!("digest {s:?} is not 64 lowercase hex chars")));
        }
        let decoded = HEXLOWER
            .decode(hex.as_bytes())
            .map_err(|e| Error(e.to_string()))?;
        Ok(Self(decoded.try_into().expect("length checked above")))
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.as_hex())
    }
}
