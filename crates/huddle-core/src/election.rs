//! Stateless pairwise leader election.
//!
//! Both sides of a pair evaluate the same comparison on the same two ids, so
//! exactly one of them decides to send the invitation and the other waits.
//! No round-trip is needed.

use crate::types::UserId;

/// Decide whether the local side should issue the invitation to `remote`.
///
/// Returns true iff the canonical (lowercase, hyphenated) form of `local`
/// sorts strictly before that of `remote`. A remote id that is not a UUID
/// fails open and returns true: such a peer is untrusted anyway and an
/// invitation is cheap.
pub fn should_initiate(local: &UserId, remote: &UserId) -> bool {
    let remote = match remote.parse_uuid() {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => return true,
    };
    let local = match local.parse_uuid() {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => local.as_str().to_lowercase(),
    };
    local < remote
}
