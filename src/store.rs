//! Persistence port for seals and their append-only verification history.
//!
//! The orchestrator depends only on [`SealStore`]; hosts choose the backing
//! technology.  [`MemorySealStore`] backs tests and ephemeral runs, the
//! sqlite module provides the durable reference implementation.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Result, SealError};
use crate::seal::{Seal, SealStatus, VerificationRecord};

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Storage contract the seal orchestrator depends on.
///
/// Verification records are append-only: implementations must never expose a
/// way to mutate or delete them.
pub trait SealStore: Send {
    fn insert_seal(&mut self, seal: &Seal) -> Result<()>;
    fn find_by_serial(&self, serial: &str) -> Result<Option<Seal>>;
    fn find_by_id(&self, id: &Uuid) -> Result<Option<Seal>>;
    fn update_seal(&mut self, seal: &Seal) -> Result<()>;

    fn append_record(&mut self, record: &VerificationRecord) -> Result<()>;
    /// Full verification history for a seal, ordered by `verified_at`.
    fn history(&self, seal_id: &Uuid) -> Result<Vec<VerificationRecord>>;

    /// Non-terminal seals whose `expires_at` falls on or before `cutoff_utc`
    /// (maintenance sweep, consumed by an external job).
    fn expiring_before(&self, cutoff_utc: &str) -> Result<Vec<Seal>>;
    /// Provisioned seals not yet bound to a shipment.
    fn unattached(&self) -> Result<Vec<Seal>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// HashMap-backed store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySealStore {
    seals: HashMap<Uuid, Seal>,
    serial_index: HashMap<String, Uuid>,
    records: Vec<VerificationRecord>,
}

impl MemorySealStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SealStore for MemorySealStore {
    fn insert_seal(&mut self, seal: &Seal) -> Result<()> {
        if self.serial_index.contains_key(&seal.serial_number) {
            return Err(SealError::Store(format!(
                "serial '{}' already exists",
                seal.serial_number
            )));
        }
        self.serial_index.insert(seal.serial_number.clone(), seal.id);
        self.seals.insert(seal.id, seal.clone());
        Ok(())
    }

    fn find_by_serial(&self, serial: &str) -> Result<Option<Seal>> {
        Ok(self
            .serial_index
            .get(serial)
            .and_then(|id| self.seals.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<Seal>> {
        Ok(self.seals.get(id).cloned())
    }

    fn update_seal(&mut self, seal: &Seal) -> Result<()> {
        if !self.seals.contains_key(&seal.id) {
            return Err(SealError::Store(format!("seal {} not persisted", seal.id)));
        }
        self.seals.insert(seal.id, seal.clone());
        Ok(())
    }

    fn append_record(&mut self, record: &VerificationRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn history(&self, seal_id: &Uuid) -> Result<Vec<VerificationRecord>> {
        let mut out: Vec<VerificationRecord> = self
            .records
            .iter()
            .filter(|r| r.seal_id == *seal_id)
            .cloned()
            .collect();
        // Records arrive in order; the sort keeps the contract explicit.
        out.sort_by(|a, b| a.verified_at.cmp(&b.verified_at));
        Ok(out)
    }

    fn expiring_before(&self, cutoff_utc: &str) -> Result<Vec<Seal>> {
        Ok(self
            .seals
            .values()
            .filter(|s| !s.status.is_terminal())
            .filter(|s| {
                s.expires_at
                    .as_deref()
                    .is_some_and(|e| e <= cutoff_utc)
            })
            .cloned()
            .collect())
    }

    fn unattached(&self) -> Result<Vec<Seal>> {
        Ok(self
            .seals
            .values()
            .filter(|s| s.status == SealStatus::Provisioned && s.shipment_id.is_none())
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Audit export
// ---------------------------------------------------------------------------

/// Bundle a seal and its full ordered history for external audit packs.
pub fn audit_bundle<S: SealStore>(store: &S, serial: &str) -> Result<serde_json::Value> {
    let seal = store
        .find_by_serial(serial)?
        .ok_or_else(|| SealError::NotFound(format!("no seal with serial '{serial}'")))?;
    let history = store.history(&seal.id)?;
    Ok(serde_json::json!({
        "format": "sealtrace-audit-v1",
        "exported_at_utc": crate::util::now_utc_rfc3339(),
        "seal": seal,
        "verifications": history,
    }))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
