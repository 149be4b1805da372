use chrono::{DateTime, Utc};

use super::sync_model::{ConflictInfo, EventSync};
use crate::events::UnifiedEvent;
use crate::providers::RemoteEvent;

/// How a pulled remote item relates to its local counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClassification {
    /// No ledger row yet: first sight of the object, never a conflict
    New,
    /// Neither side changed since the last successful sync
    Unchanged,
    /// Only the local copy changed; the push path owns it
    LocalOnly,
    /// Only the remote copy changed; applied as a plain update
    RemoteOnly,
    /// Both sides changed independently since the last successful sync
    Conflict,
}

/// Classifies a pulled change against the ledger.
///
/// A conflict exists iff both the local and the remote modification times
/// are strictly after the ledger's last successful sync. A row that never
/// synced successfully counts everything after the epoch as changed.
pub fn classify(
    ledger: Option<&EventSync>,
    local_modified_at: DateTime<Utc>,
    remote_modified_at: DateTime<Utc>,
) -> ChangeClassification {
    let row = match ledger {
        None => return ChangeClassification::New,
        Some(row) => row,
    };

    let last_synced_at = row.last_synced_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let local_changed = local_modified_at > last_synced_at;
    let remote_changed = remote_modified_at > last_synced_at;

    match (local_changed, remote_changed) {
        (true, true) => ChangeClassification::Conflict,
        (false, true) => ChangeClassification::RemoteOnly,
        (true, false) => ChangeClassification::LocalOnly,
        (false, false) => ChangeClassification::Unchanged,
    }
}

/// Builds the conflict report handed back to the CRM layer.
/// `auto_resolvable` is always false; resolution is a human decision.
pub fn build_conflict(
    integration_id: &str,
    local: &UnifiedEvent,
    remote: &RemoteEvent,
) -> ConflictInfo {
    let disputed = remote.changed_fields(local);
    ConflictInfo {
        event_id: local.id.clone(),
        integration_id: integration_id.to_string(),
        local_modified_at: local.updated_at,
        remote_modified_at: remote.remote_updated_at,
        local_fields: disputed.clone(),
        remote_fields: disputed,
        auto_resolvable: false,
    }
}
