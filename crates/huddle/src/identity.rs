//! Local identity bootstrap.

use huddle_core::{LocalIdentity, PeerHandle};
use huddle_store::{Store, StoreExt};

use crate::error::Result;

/// Load the persisted identity or create and persist a new one.
///
/// The user id never changes once created. The device handle is regenerated
/// only when `display_name` differs from the stored one. A failed save is
/// logged and the in-memory identity is returned anyway.
pub async fn get_or_create_local_identity<S>(store: &S, display_name: &str) -> Result<LocalIdentity>
where
    S: Store + ?Sized,
{
    let identity = match store.load_identity().await? {
        Some(existing) if existing.display_name() == display_name => return Ok(existing),
        Some(existing) => {
            tracing::info!(
                user = %existing.user_id,
                old = existing.display_name(),
                new = display_name,
                "display name changed, regenerating device handle"
            );
            LocalIdentity {
                user_id: existing.user_id,
                device: PeerHandle::new(display_name),
            }
        }
        None => {
            let identity = LocalIdentity::generate(display_name);
            tracing::info!(user = %identity.user_id, device = %identity.device, "created local identity");
            identity
        }
    };

    if let Err(e) = store.save_identity(&identity).await {
        tracing::warn!(error = %e, "failed to persist local identity");
    }
    Ok(identity)
}
