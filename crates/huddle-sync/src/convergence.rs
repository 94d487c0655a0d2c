//! Convergence verification for message logs.
//!
//! Two devices that hold the same user messages produce the same digest,
//! regardless of order or of the local system notes each one appended.

use std::fmt;

use huddle_core::MessageLog;

/// Domain separator for the digest.
const DIGEST_DOMAIN: &[u8] = b"huddle-log-v1:";

/// BLAKE3 digest over the user-message ids of a log.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogDigest(pub [u8; 32]);

impl LogDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for LogDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for LogDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the digest of a log.
///
/// Algorithm:
/// 1. Collect ids of non-system messages
/// 2. Sort them
/// 3. H = Blake3(domain || id_1 || ... || id_n)
pub fn log_digest(log: &MessageLog) -> LogDigest {
    let mut ids: Vec<[u8; 16]> = log.user_messages().map(|m| *m.id.as_bytes()).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    for id in &ids {
        hasher.update(id);
    }
    LogDigest(*hasher.finalize().as_bytes())
}
