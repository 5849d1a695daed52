//! Running calls, keyed on call id.

use std::sync::Arc;

use dashmap::DashMap;

use tandem_core::call_keys::CallId;

use super::actor::GroupCallHandle;
use super::state::CallStateKind;

/// Shared between whoever starts calls and whoever looks them up.
pub type GroupCallRegistry = Arc<DashMap<CallId, GroupCallHandle>>;

pub fn new_call_registry() -> GroupCallRegistry {
    Arc::new(DashMap::new())
}

/// Drop handles of calls that have ended. Returns how many were removed.
pub fn prune_ended(registry: &GroupCallRegistry) -> usize {
    let mut removed = 0;
    registry.retain(|call_id, handle| {
        let ended = handle.state() == CallStateKind::Ended;
        if ended {
            tracing::debug!(%call_id, "dropping ended call");
            removed += 1;
        }
        !ended
    });
    if removed > 0 {
        tracing::info!(removed, "pruned ended calls");
    }
    removed
}
