//! Event reconciliation
//!
//! Pure diff algorithm: given the local snapshot, the remote snapshot (full
//! or delta), and the current ledger, produce the minimal set of corrective
//! operations. No I/O happens here; the orchestrator applies the plan.

use std::collections::{HashMap, HashSet};

use calbridge_domain::{
    ConflictOutcome, ConflictResolution, LocalEvent, RemoteEvent, SyncedEvent,
};
use tracing::debug;

/// How the remote snapshot was obtained, which changes what absence means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// First contact with a calendar: full listing, plus one-time
    /// content-fingerprint matching so pre-existing identical events are
    /// linked instead of duplicated.
    Initial,
    /// Full listing of the calendar. A ledgered remote event missing from
    /// the snapshot was deleted on the provider side.
    Full,
    /// Provider delta since the last cursor. Absence means "unchanged";
    /// only events explicitly marked cancelled count as deletions.
    Delta,
}

/// One corrective operation produced by [`reconcile`]
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOperation {
    /// Push a local-only event to the provider
    CreateRemote(LocalEvent),
    /// Pull a remote-only event into the local store
    CreateLocal(RemoteEvent),
    /// Local edit wins over an unchanged remote copy
    UpdateRemote { event: LocalEvent, remote_event_id: String },
    /// Remote edit (or conflict under remote-wins) overwrites the local copy
    UpdateLocal { event: RemoteEvent, local_event_id: String },
    /// Local deletion propagates to the provider
    DeleteRemote { local_event_id: String, remote_event_id: String },
    /// Remote deletion propagates to the local store
    DeleteLocal { local_event_id: String, remote_event_id: String },
    /// First-contact match or converged edit: refresh the ledger entry, move
    /// no data
    Link { local: LocalEvent, remote: RemoteEvent },
}

impl SyncOperation {
    /// Identity recorded in error reports when applying this operation fails
    pub fn item_id(&self) -> &str {
        match self {
            Self::CreateRemote(event) | Self::UpdateRemote { event, .. } => &event.id,
            Self::CreateLocal(event) => &event.id,
            Self::UpdateLocal { local_event_id, .. }
            | Self::DeleteRemote { local_event_id, .. }
            | Self::DeleteLocal { local_event_id, .. } => local_event_id,
            Self::Link { local, .. } => &local.id,
        }
    }

    /// Whether applying this operation writes to the provider
    pub fn touches_remote(&self) -> bool {
        matches!(
            self,
            Self::CreateRemote(_) | Self::UpdateRemote { .. } | Self::DeleteRemote { .. }
        )
    }
}

/// Output of [`reconcile`]: the operations to apply plus an audit trail of
/// conflicts resolved under the remote-wins policy.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub operations: Vec<SyncOperation>,
    pub conflicts: Vec<ConflictOutcome>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of create operations, in either direction
    pub fn creates(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| {
                matches!(op, SyncOperation::CreateRemote(_) | SyncOperation::CreateLocal(_))
            })
            .count()
    }
}

/// Diff local events, remote events, and the ledger into a corrective plan.
///
/// Ledger lookups are the sole pairing mechanism; content matching only runs
/// for unmatched remote events in [`SyncMode::Initial`].
pub fn reconcile(
    local_events: &[LocalEvent],
    remote_events: &[RemoteEvent],
    ledger: &[SyncedEvent],
    mode: SyncMode,
) -> ReconcilePlan {
    let local_by_id: HashMap<&str, &LocalEvent> =
        local_events.iter().map(|e| (e.id.as_str(), e)).collect();
    let remote_by_id: HashMap<&str, &RemoteEvent> =
        remote_events.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut plan = ReconcilePlan::default();
    let mut paired_local: HashSet<&str> = HashSet::new();
    let mut paired_remote: HashSet<&str> = HashSet::new();

    for entry in ledger {
        paired_local.insert(entry.local_event_id.as_str());
        paired_remote.insert(entry.remote_event_id.as_str());

        let local = local_by_id.get(entry.local_event_id.as_str()).copied();
        let remote = remote_by_id.get(entry.remote_event_id.as_str()).copied();

        match (local, remote) {
            (Some(local), Some(remote)) if remote.cancelled => {
                plan.operations.push(SyncOperation::DeleteLocal {
                    local_event_id: local.id.clone(),
                    remote_event_id: remote.id.clone(),
                });
            }
            (Some(local), Some(remote)) => {
                reconcile_pair(entry, local, remote, &mut plan);
            }
            (None, _) => {
                // Local side is gone; the remote copy (present or not) must go
                // with it. A provider not-found during apply counts as done.
                plan.operations.push(SyncOperation::DeleteRemote {
                    local_event_id: entry.local_event_id.clone(),
                    remote_event_id: entry.remote_event_id.clone(),
                });
            }
            (Some(local), None) => {
                if mode != SyncMode::Delta {
                    // Full listing: absence means the provider deleted it
                    plan.operations.push(SyncOperation::DeleteLocal {
                        local_event_id: local.id.clone(),
                        remote_event_id: entry.remote_event_id.clone(),
                    });
                }
                // Delta: not in the delta means unchanged, nothing to do
            }
        }
    }

    // Unmatched local events are new on our side
    for local in local_events {
        if !paired_local.contains(local.id.as_str()) {
            plan.operations.push(SyncOperation::CreateRemote((*local).clone()));
        }
    }

    // Unmatched remote events are new on the provider side
    let mut fingerprints: HashMap<String, &LocalEvent> = HashMap::new();
    if mode == SyncMode::Initial {
        for local in local_events {
            if !paired_local.contains(local.id.as_str()) {
                fingerprints.insert(local.fingerprint(), local);
            }
        }
    }
    let mut linked_local: HashSet<&str> = HashSet::new();

    for remote in remote_events {
        if paired_remote.contains(remote.id.as_str()) {
            continue;
        }
        if remote.cancelled {
            // Never seen and already deleted; nothing to propagate
            continue;
        }

        if mode == SyncMode::Initial {
            if let Some(local) = fingerprints.get(&remote.fingerprint()).copied() {
                if !linked_local.contains(local.id.as_str()) {
                    debug!(
                        local_id = %local.id,
                        remote_id = %remote.id,
                        "first-contact fingerprint match, linking without copy"
                    );
                    linked_local.insert(local.id.as_str());
                    // Drop the matched local's pending CreateRemote: the pair
                    // already exists identically on both sides.
                    plan.operations.retain(|op| {
                        !matches!(op, SyncOperation::CreateRemote(l) if l.id == local.id)
                    });
                    plan.operations.push(SyncOperation::Link {
                        local: local.clone(),
                        remote: remote.clone(),
                    });
                    continue;
                }
            }
        }

        plan.operations.push(SyncOperation::CreateLocal(remote.clone()));
    }

    plan
}

/// Rule 2: both sides of a ledgered pair still exist; detect which side moved
fn reconcile_pair(
    entry: &SyncedEvent,
    local: &LocalEvent,
    remote: &RemoteEvent,
    plan: &mut ReconcilePlan,
) {
    let local_changed =
        local.updated_at > entry.last_synced_at && local.fingerprint() != entry.fingerprint;
    let remote_changed = remote_changed_since(entry, remote);

    match (local_changed, remote_changed) {
        (false, false) => {}
        (true, false) => {
            plan.operations.push(SyncOperation::UpdateRemote {
                event: local.clone(),
                remote_event_id: remote.id.clone(),
            });
        }
        (false, true) => {
            plan.operations.push(SyncOperation::UpdateLocal {
                event: remote.clone(),
                local_event_id: local.id.clone(),
            });
        }
        (true, true) => {
            if local.fingerprint() == remote.fingerprint() {
                // Both sides converged on identical content; just refresh the
                // ledger so the next run sees them as in sync.
                plan.operations.push(SyncOperation::Link {
                    local: local.clone(),
                    remote: remote.clone(),
                });
                return;
            }
            debug!(
                local_id = %local.id,
                remote_id = %remote.id,
                "both sides changed since last sync, remote wins"
            );
            plan.conflicts.push(ConflictOutcome {
                local_event_id: local.id.clone(),
                remote_event_id: remote.id.clone(),
                resolution: ConflictResolution::RemoteWins,
            });
            plan.operations.push(SyncOperation::UpdateLocal {
                event: remote.clone(),
                local_event_id: local.id.clone(),
            });
        }
    }
}

/// Remote change detection prefers the provider's version token over
/// wall-clock comparison; timestamps are only a fallback (clock skew between
/// us and the provider makes them unreliable).
fn remote_changed_since(entry: &SyncedEvent, remote: &RemoteEvent) -> bool {
    match (&entry.remote_version, &remote.etag) {
        (Some(synced), Some(current)) => synced != current,
        _ => match remote.updated {
            Some(updated) => updated > entry.last_synced_at,
            None => remote.fingerprint() != entry.fingerprint,
        },
    }
}
