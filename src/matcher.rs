//! Maps gateway records onto local rows.
//!
//! Every "have we seen this?" decision goes through the store's unique
//! `(gateway, kind, external_id)` key, never through in-memory state, so a
//! run resumed after a restart makes the same decisions.

use serde::Serialize;

use crate::error::Result;
use crate::gateway::{GatewayId, RecordKind};
use crate::storage::{LocalRecord, LocalRecordFields, SyncStore};

/// What a sighting of a remote record does to local state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDecision {
    Create,
    Update,
    Unchanged,
}

/// Outcome of reconciling one record.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
    pub decision: MatchDecision,
    pub record: LocalRecord,
    /// Gateway status before this sighting, if the row existed.
    pub previous_status: Option<String>,
}

/// Record matcher over a [`SyncStore`].
#[derive(Clone)]
pub struct RecordMatcher<S> {
    store: S,
}

impl<S: SyncStore> RecordMatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The local row for a gateway object, if one exists.
    pub async fn match_record(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>> {
        self.store.find_local(gateway, kind, external_id).await
    }

    /// Only status and amount count as changes.
    pub fn decide(existing: Option<&LocalRecord>, incoming: &LocalRecordFields) -> MatchDecision {
        match existing {
            None => MatchDecision::Create,
            Some(local) if local.status != incoming.status || local.amount != incoming.amount => {
                MatchDecision::Update
            }
            Some(_) => MatchDecision::Unchanged,
        }
    }

    /// Look up, decide, and write when needed.
    pub async fn reconcile(&self, incoming: &LocalRecordFields) -> Result<Reconciled> {
        let existing = self
            .match_record(incoming.gateway, incoming.kind, &incoming.external_id)
            .await?;
        let decision = Self::decide(existing.as_ref(), incoming);
        let previous_status = existing.as_ref().map(|r| r.status.clone());

        let record = match (decision, existing) {
            (MatchDecision::Unchanged, Some(local)) => local,
            _ => self.store.upsert_local(incoming).await?,
        };

        tracing::trace!(
            target: "gatesync::sync",
            gateway = %incoming.gateway,
            kind = %incoming.kind,
            external_id = %incoming.external_id,
            decision = ?decision,
            "Matched record"
        );

        Ok(Reconciled {
            decision,
            record,
            previous_status,
        })
    }
}
