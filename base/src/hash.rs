// Md5Digest wraps the raw 16-byte digest used throughout the metadata index:
// segment.file_hash, sequence.hash, the per-value-file rolling hash, and the
// per-collection audit digest are all this same type.

use md5::{Digest, Md5};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Md5Digest(pub [u8; 16]);

impl Md5Digest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.0)
    }

    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s).ok()?;
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl std::fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental MD5, used by the writer to maintain a value file's rolling
/// hash across many appended sequences without re-reading the file.
pub struct RollingMd5(Md5);

impl RollingMd5 {
    pub fn new() -> Self {
        Self(Md5::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn digest(&self) -> Md5Digest {
        Md5Digest(self.0.clone().finalize().into())
    }
}

impl Default for RollingMd5 {
    fn default() -> Self {
        Self::new()
    }
}

/// Adler-32 rolling checksum (RFC 1950 §8.2). The original system computes
/// this via zlib; there is no external crate for it in this ecosystem small
/// enough to be worth a dependency, so it is reproduced here directly.
const ADLER_MOD: u32 = 65521;

pub fn adler32(bytes: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in bytes {
        a = (a + byte as u32) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (b << 16) | a
}
