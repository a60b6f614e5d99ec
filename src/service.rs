//! Seal lifecycle orchestration: provision, attach, verify, remove, damage
//! reports.
//!
//! The verify path is a read-decide-write sequence over the seal's challenge
//! and counter, so the service serializes verify/attach/remove per serial
//! number through a keyed lock map.  Two concurrent verifications of the
//! same seal can otherwise race and let a replayed reading slip through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};
use uuid::Uuid;

use crate::anomaly;
use crate::config::SealtraceConfig;
use crate::crypto::{self, MasterKey};
use crate::error::{Result, SealError};
use crate::reader::{ClaimedReading, SealReader as _, SimulatedSealReader};
use crate::score::integrity_score;
use crate::seal::{
    may_transition, normalize_serial, Seal, SealStatus, TamperIndicator, VerificationRecord,
};
use crate::store::SealStore;
use crate::util;

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Runtime limits resolved from configuration.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub counter_max_jump: i64,
    pub location_tolerance_km: f64,
    pub batch_limit: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            counter_max_jump: anomaly::DEFAULT_COUNTER_MAX_JUMP,
            location_tolerance_km: 50.0,
            batch_limit: 100,
        }
    }
}

impl ServiceLimits {
    pub fn from_config(cfg: &SealtraceConfig) -> Self {
        Self {
            counter_max_jump: cfg.verify.counter_max_jump,
            location_tolerance_km: cfg.verify.location_tolerance_km,
            batch_limit: cfg.provision.batch_limit,
        }
    }
}

/// A claimed reading submitted for verification.  Entirely untrusted.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub serial_number: String,
    pub signature_der: Vec<u8>,
    pub read_counter: i64,
    pub verified_by: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub device_info: Option<String>,
}

/// Everything a caller needs to act on one verification.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub seal: Seal,
    pub record: VerificationRecord,
    /// Whether the protocol accepted the reading.  `false` with a populated
    /// tamper indicator means "the protocol worked and found tampering".
    pub is_valid: bool,
    pub tamper_indicator: TamperIndicator,
    pub integrity_score: u8,
    /// The rotated challenge, present only after a successful verification.
    pub next_challenge: Option<String>,
}

/// Result of a bounded batch provisioning call.
#[derive(Debug)]
pub struct BatchProvisionOutcome {
    pub provisioned: Vec<Seal>,
    /// (serial, reason) pairs for inputs that were skipped.
    pub rejected: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SealService<S: SealStore> {
    store: Mutex<S>,
    master_key: MasterKey,
    limits: ServiceLimits,
    seal_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: SealStore> std::fmt::Debug for SealService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealService")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<S: SealStore> SealService<S> {
    pub fn new(store: S, master_key: MasterKey, limits: ServiceLimits) -> Self {
        Self {
            store: Mutex::new(store),
            master_key,
            limits,
            seal_locks: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-serial mutex guarding the read-decide-write sequence of
    /// verify/attach/remove.
    fn serial_lock(&self, serial: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .seal_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(serial.to_string()).or_default())
    }

    // -----------------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------------

    /// Create a seal identity for a physical tag: fresh key pair, fresh
    /// challenge, private key encrypted under the master key.  The private
    /// key never leaves the store in plaintext.
    pub fn provision(&self, serial: &str, expires_at: Option<&str>) -> Result<Seal> {
        let serial = normalize_serial(serial)?;
        if let Some(expiry) = expires_at {
            util::validate_rfc3339(expiry, "expires_at")?;
        }
        // The store's unique serial index backs this check up under
        // concurrent provisioning.
        if self.store().find_by_serial(&serial)?.is_some() {
            return Err(SealError::Validation(format!(
                "serial '{serial}' already provisioned"
            )));
        }

        let keys = crypto::generate_keypair()?;
        let encrypted_private_key = crypto::encrypt_private_key(&keys.private_key_pem, &self.master_key)?;
        let fingerprint = crypto::public_key_fingerprint(&keys.public_key_pem)?;

        let seal = Seal {
            id: Uuid::new_v4(),
            serial_number: serial.clone(),
            shipment_id: None,
            status: SealStatus::Provisioned,
            public_key_pem: keys.public_key_pem,
            encrypted_private_key,
            challenge: crypto::generate_challenge(),
            expected_read_count: 0,
            actual_read_count: 0,
            attached_at: None,
            attached_by: None,
            attached_location: None,
            attached_lat: None,
            attached_lng: None,
            removed_at: None,
            removed_by: None,
            removed_location: None,
            removed_reason: None,
            tamper_indicator: TamperIndicator::None,
            tamper_details: None,
            expires_at: expires_at.map(str::to_string),
            provisioned_at: util::now_utc_rfc3339(),
        };
        self.store().insert_seal(&seal)?;
        info!(serial = %serial, key_fingerprint = %fingerprint, "seal provisioned");
        Ok(seal)
    }

    /// Provision up to `batch_limit` seals in one call.  Key generation is
    /// deliberately sequential: it is CPU-bound and unbounded parallelism is
    /// a resource-exhaustion risk.  Per-serial failures are collected rather
    /// than aborting the batch.
    pub fn provision_batch(
        &self,
        serials: &[String],
        expires_at: Option<&str>,
    ) -> Result<BatchProvisionOutcome> {
        if serials.len() > self.limits.batch_limit {
            return Err(SealError::Validation(format!(
                "batch of {} exceeds limit of {}",
                serials.len(),
                self.limits.batch_limit
            )));
        }
        let mut provisioned = Vec::new();
        let mut rejected = Vec::new();
        for serial in serials {
            match self.provision(serial, expires_at) {
                Ok(seal) => provisioned.push(seal),
                Err(e) => {
                    warn!(serial = %serial, error = %e, "batch provisioning skipped serial");
                    rejected.push((serial.clone(), e.to_string()));
                }
            }
        }
        info!(
            provisioned = provisioned.len(),
            rejected = rejected.len(),
            "batch provisioning finished"
        );
        Ok(BatchProvisionOutcome {
            provisioned,
            rejected,
        })
    }

    // -----------------------------------------------------------------------
    // Attach / remove / damage
    // -----------------------------------------------------------------------

    /// Bind a provisioned seal to a shipment.
    pub fn attach(
        &self,
        seal_id: &Uuid,
        shipment_id: &str,
        actor: &str,
        location: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Seal> {
        if shipment_id.trim().is_empty() {
            return Err(SealError::Validation("shipment id must not be empty".into()));
        }
        let serial = self.serial_for(seal_id)?;
        let lock = self.serial_lock(&serial);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seal = self.seal_by_id(seal_id)?;
        if !seal.can_attach() {
            return Err(SealError::InvalidState(format!(
                "cannot attach seal in status '{}'",
                seal.status
            )));
        }
        transition(&mut seal, SealStatus::Attached)?;
        seal.shipment_id = Some(shipment_id.trim().to_string());
        seal.attached_at = Some(util::now_utc_rfc3339());
        seal.attached_by = Some(actor.to_string());
        seal.attached_location = location;
        seal.attached_lat = latitude;
        seal.attached_lng = longitude;
        self.store().update_seal(&seal)?;
        info!(serial = %seal.serial_number, shipment = %shipment_id, by = %actor, "seal attached");
        Ok(seal)
    }

    /// Record the controlled removal of a seal at destination.
    pub fn remove(
        &self,
        seal_id: &Uuid,
        actor: &str,
        location: Option<String>,
        reason: Option<String>,
    ) -> Result<Seal> {
        let serial = self.serial_for(seal_id)?;
        let lock = self.serial_lock(&serial);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seal = self.seal_by_id(seal_id)?;
        if !seal.can_remove() {
            return Err(SealError::InvalidState(format!(
                "cannot remove seal in status '{}'",
                seal.status
            )));
        }
        transition(&mut seal, SealStatus::Removed)?;
        seal.removed_at = Some(util::now_utc_rfc3339());
        seal.removed_by = Some(actor.to_string());
        seal.removed_location = location;
        seal.removed_reason = reason;
        self.store().update_seal(&seal)?;
        info!(serial = %seal.serial_number, by = %actor, "seal removed");
        Ok(seal)
    }

    /// Physical damage observed in the field.  Permitted from any
    /// non-terminal state; terminal thereafter.
    pub fn report_damage(&self, seal_id: &Uuid, actor: &str, description: &str) -> Result<Seal> {
        if description.trim().is_empty() {
            return Err(SealError::Validation(
                "damage description must not be empty".into(),
            ));
        }
        let serial = self.serial_for(seal_id)?;
        let lock = self.serial_lock(&serial);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seal = self.seal_by_id(seal_id)?;
        if seal.status.is_terminal() {
            return Err(SealError::InvalidState(format!(
                "cannot report damage on seal in status '{}'",
                seal.status
            )));
        }
        transition(&mut seal, SealStatus::Tampered)?;
        seal.tamper_indicator = TamperIndicator::PhysicalDamage;
        seal.tamper_details = Some(description.trim().to_string());
        self.store().update_seal(&seal)?;
        warn!(serial = %seal.serial_number, by = %actor, "physical damage reported");
        Ok(seal)
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Authenticate a claimed reading against the seal's outstanding
    /// challenge and counter, classify anomalies, update the seal, rotate
    /// the challenge, and append an audit record -- unconditionally, valid
    /// or not.
    pub fn verify(&self, req: &VerifyRequest) -> Result<VerifyOutcome> {
        let serial = normalize_serial(&req.serial_number)?;
        let lock = self.serial_lock(&serial);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seal = self
            .store()
            .find_by_serial(&serial)?
            .ok_or_else(|| SealError::NotFound(format!("no seal with serial '{serial}'")))?;
        if !seal.can_verify() {
            return Err(SealError::InvalidState(format!(
                "cannot verify seal in status '{}'",
                seal.status
            )));
        }

        let now = util::now_utc_rfc3339();
        let challenge_used = seal.challenge.clone();

        // Lazy expiry: there is no background sweep, expiry lands on the
        // next reading.  Not tamper evidence.
        if seal.is_expired(&now) {
            transition(&mut seal, SealStatus::Expired)?;
            let record = make_record(
                &seal,
                req,
                &now,
                &challenge_used,
                false,
                TamperIndicator::None,
                None,
            );
            let score = {
                let mut store = self.store();
                store.update_seal(&seal)?;
                store.append_record(&record)?;
                let history = store.history(&seal.id)?;
                integrity_score(&seal, &history)
            };
            info!(serial = %serial, "seal expired at verification");
            return Ok(VerifyOutcome {
                seal,
                record,
                is_valid: false,
                tamper_indicator: TamperIndicator::None,
                integrity_score: score,
                next_challenge: None,
            });
        }

        let signature_ok =
            crypto::verify_signature(&challenge_used, &req.signature_der, &seal.public_key_pem)?;
        let counter_anomalous = anomaly::counter_anomalous(
            seal.expected_read_count,
            req.read_counter,
            self.limits.counter_max_jump,
        );
        let divergence = anomaly::location_divergence_km(
            seal.attached_lat,
            seal.attached_lng,
            req.latitude,
            req.longitude,
        );
        let location_anomalous =
            divergence.is_some_and(|d| d > self.limits.location_tolerance_km);

        // First match wins.
        let indicator = if !signature_ok {
            TamperIndicator::SignatureMismatch
        } else if counter_anomalous {
            TamperIndicator::CounterAnomaly
        } else if location_anomalous {
            TamperIndicator::LocationMismatch
        } else {
            TamperIndicator::None
        };
        // A location mismatch alone does not invalidate the reading; it is
        // recorded for downstream scoring.
        let is_valid = signature_ok && !counter_anomalous;

        let details = match indicator {
            TamperIndicator::SignatureMismatch => {
                Some("signature does not verify against the outstanding challenge".to_string())
            }
            TamperIndicator::CounterAnomaly => Some(format!(
                "reported counter {} outside plausible window [{}, {}]",
                req.read_counter,
                seal.expected_read_count,
                seal.expected_read_count + self.limits.counter_max_jump
            )),
            TamperIndicator::LocationMismatch => divergence.map(|d| {
                format!(
                    "reading {:.1} km from attach location (tolerance {:.1} km)",
                    d, self.limits.location_tolerance_km
                )
            }),
            _ => None,
        };

        let next_challenge = if matches!(
            indicator,
            TamperIndicator::SignatureMismatch | TamperIndicator::CounterAnomaly
        ) {
            transition(&mut seal, SealStatus::Tampered)?;
            seal.tamper_indicator = indicator;
            seal.tamper_details = details.clone();
            warn!(serial = %serial, indicator = %indicator, "tamper detected");
            None
        } else {
            transition(&mut seal, SealStatus::Verified)?;
            seal.actual_read_count = req.read_counter;
            seal.expected_read_count = req.read_counter;
            seal.tamper_indicator = indicator;
            seal.tamper_details = details.clone();
            // Rotate so the consumed challenge can never validate a future
            // reading.
            let fresh = crypto::generate_challenge();
            seal.challenge = fresh.clone();
            Some(fresh)
        };

        let record = make_record(&seal, req, &now, &challenge_used, is_valid, indicator, details);
        let score = {
            let mut store = self.store();
            store.update_seal(&seal)?;
            store.append_record(&record)?;
            let history = store.history(&seal.id)?;
            integrity_score(&seal, &history)
        };
        info!(serial = %serial, valid = is_valid, score, "verification recorded");
        Ok(VerifyOutcome {
            seal,
            record,
            is_valid,
            tamper_indicator: indicator,
            integrity_score: score,
            next_challenge,
        })
    }

    // -----------------------------------------------------------------------
    // Lookups and maintenance
    // -----------------------------------------------------------------------

    pub fn seal_by_serial(&self, serial: &str) -> Result<Seal> {
        let serial = normalize_serial(serial)?;
        self.store()
            .find_by_serial(&serial)?
            .ok_or_else(|| SealError::NotFound(format!("no seal with serial '{serial}'")))
    }

    fn seal_by_id(&self, seal_id: &Uuid) -> Result<Seal> {
        self.store()
            .find_by_id(seal_id)?
            .ok_or_else(|| SealError::NotFound(format!("no seal with id {seal_id}")))
    }

    fn serial_for(&self, seal_id: &Uuid) -> Result<String> {
        Ok(self.seal_by_id(seal_id)?.serial_number)
    }

    /// Diagnostics accessor for the outstanding challenge.
    pub fn current_challenge(&self, serial: &str) -> Result<String> {
        Ok(self.seal_by_serial(serial)?.challenge)
    }

    pub fn history(&self, serial: &str) -> Result<Vec<VerificationRecord>> {
        let seal = self.seal_by_serial(serial)?;
        self.store().history(&seal.id)
    }

    /// Non-terminal seals expiring within the next `days` days.
    pub fn expiring_within_days(&self, days: u32) -> Result<Vec<Seal>> {
        self.store()
            .expiring_before(&util::utc_rfc3339_after_days(days))
    }

    /// Provisioned seals not yet bound to a shipment.
    pub fn unattached(&self) -> Result<Vec<Seal>> {
        self.store().unattached()
    }

    /// Seal plus full ordered history, for external audit packs.
    pub fn audit_bundle(&self, serial: &str) -> Result<serde_json::Value> {
        let serial = normalize_serial(serial)?;
        crate::store::audit_bundle(&*self.store(), &serial)
    }

    /// Produce a reading the way the simulated reader would.
    ///
    /// **Simulation/testing path.**  Decrypts the server-held private key
    /// copy; a production deployment has no business calling this (see
    /// [`crate::reader`]).
    pub fn simulate_reading(&self, serial: &str) -> Result<ClaimedReading> {
        let seal = self.seal_by_serial(serial)?;
        SimulatedSealReader::new(&self.master_key).read(&seal)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Move a seal through the closed transition table.
fn transition(seal: &mut Seal, to: SealStatus) -> Result<()> {
    if !may_transition(seal.status, to) {
        return Err(SealError::InvalidState(format!(
            "no transition from '{}' to '{to}'",
            seal.status
        )));
    }
    seal.status = to;
    Ok(())
}

fn make_record(
    seal: &Seal,
    req: &VerifyRequest,
    now: &str,
    challenge_used: &str,
    is_valid: bool,
    indicator: TamperIndicator,
    details: Option<String>,
) -> VerificationRecord {
    VerificationRecord {
        id: Uuid::new_v4(),
        seal_id: seal.id,
        verified_by: req.verified_by.clone(),
        verified_at: now.to_string(),
        latitude: req.latitude,
        longitude: req.longitude,
        location: req.location.clone(),
        read_counter: req.read_counter,
        signature_b64: util::b64_encode(&req.signature_der),
        challenge: challenge_used.to_string(),
        is_valid,
        tamper_indicator: indicator,
        tamper_details: details,
        device_info: req.device_info.clone(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySealStore;

    const BERLIN: (f64, f64) = (52.52, 13.405);
    const HAMBURG: (f64, f64) = (53.5511, 9.9937);

    fn service() -> SealService<MemorySealStore> {
        SealService::new(
            MemorySealStore::new(),
            MasterKey::from_hex(&"42".repeat(32)).unwrap(),
            ServiceLimits::default(),
        )
    }

    fn request(serial: &str, reading: &ClaimedReading) -> VerifyRequest {
        VerifyRequest {
            serial_number: serial.to_string(),
            signature_der: reading.signature_der.clone(),
            read_counter: reading.read_counter,
            verified_by: "inspector-1".to_string(),
            latitude: None,
            longitude: None,
            location: None,
            device_info: Some("handheld-7".to_string()),
        }
    }

    /// Provision + attach in one go.
    fn attached_seal(svc: &SealService<MemorySealStore>, serial: &str) -> Seal {
        let seal = svc.provision(serial, None).unwrap();
        svc.attach(&seal.id, "SHIP-1", "packer-1", None, None, None)
            .unwrap()
    }

    #[test]
    fn provision_rejects_bad_serials() {
        let svc = service();
        // 10 hex chars: wrong hardware UID length.
        let err = svc.provision("04ABCDEF12", None).unwrap_err();
        assert!(matches!(err, SealError::Validation(_)));
        assert!(svc.provision("ZZZZZZZZ", None).is_err());
    }

    #[test]
    fn provision_initial_state() {
        let svc = service();
        let seal = svc.provision("04abcdef", None).unwrap();
        assert_eq!(seal.serial_number, "04ABCDEF");
        assert_eq!(seal.status, SealStatus::Provisioned);
        assert!(seal.shipment_id.is_none());
        assert_eq!(seal.challenge.len(), 64);
        assert!(seal.public_key_pem.contains("BEGIN PUBLIC KEY"));
        // Private key is stored encrypted, never in the clear.
        assert!(!seal.encrypted_private_key.contains("PRIVATE KEY"));
    }

    #[test]
    fn provision_rejects_duplicates() {
        let svc = service();
        svc.provision("04ABCDEF", None).unwrap();
        let err = svc.provision("04abcdef", None).unwrap_err();
        assert!(matches!(err, SealError::Validation(_)));
    }

    #[test]
    fn provision_rejects_bad_expiry() {
        let svc = service();
        assert!(svc.provision("04ABCDEF", Some("not a date")).is_err());
    }

    #[test]
    fn batch_respects_cap() {
        let svc = service();
        let serials: Vec<String> = (0..101).map(|i| format!("{i:08X}")).collect();
        assert!(matches!(
            svc.provision_batch(&serials, None).unwrap_err(),
            SealError::Validation(_)
        ));
    }

    #[test]
    fn batch_collects_rejections() {
        let svc = service();
        let serials = vec![
            "04ABCDEF".to_string(),
            "bogus".to_string(),
            "04AB12CD34EF56".to_string(),
        ];
        let outcome = svc.provision_batch(&serials, None).unwrap();
        assert_eq!(outcome.provisioned.len(), 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, "bogus");
    }

    #[test]
    fn attach_binds_shipment() {
        let svc = service();
        let seal = svc.provision("04ABCDEF", None).unwrap();
        let seal = svc
            .attach(
                &seal.id,
                "SHIP-1",
                "packer-1",
                Some("Warehouse 3".into()),
                Some(BERLIN.0),
                Some(BERLIN.1),
            )
            .unwrap();
        assert_eq!(seal.status, SealStatus::Attached);
        assert_eq!(seal.shipment_id.as_deref(), Some("SHIP-1"));
        assert_eq!(seal.attached_by.as_deref(), Some("packer-1"));
        assert!(seal.attached_at.is_some());
    }

    #[test]
    fn attach_twice_is_invalid_state() {
        let svc = service();
        let seal = attached_seal(&svc, "04ABCDEF");
        let err = svc
            .attach(&seal.id, "SHIP-2", "packer-2", None, None, None)
            .unwrap_err();
        assert!(matches!(err, SealError::InvalidState(_)));
    }

    #[test]
    fn attach_unknown_seal_is_not_found() {
        let svc = service();
        let err = svc
            .attach(&Uuid::new_v4(), "SHIP-1", "packer-1", None, None, None)
            .unwrap_err();
        assert!(matches!(err, SealError::NotFound(_)));
    }

    #[test]
    fn verify_happy_path() {
        let svc = service();
        let seal = attached_seal(&svc, "04ABCDEF");
        let old_challenge = seal.challenge.clone();

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        assert_eq!(reading.read_counter, 1);
        let outcome = svc.verify(&request("04ABCDEF", &reading)).unwrap();

        assert!(outcome.is_valid);
        assert_eq!(outcome.tamper_indicator, TamperIndicator::None);
        assert_eq!(outcome.seal.status, SealStatus::Verified);
        assert_eq!(outcome.seal.expected_read_count, 1);
        assert_eq!(outcome.seal.actual_read_count, 1);
        assert_eq!(outcome.integrity_score, 100);
        let next = outcome.next_challenge.unwrap();
        assert_ne!(next, old_challenge);
        assert_eq!(svc.current_challenge("04ABCDEF").unwrap(), next);
    }

    #[test]
    fn replayed_signature_is_tampering() {
        let svc = service();
        attached_seal(&svc, "04ABCDEF");

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        assert!(svc.verify(&request("04ABCDEF", &reading)).unwrap().is_valid);

        // Same signature again: the challenge has rotated underneath it.
        let mut replay = request("04ABCDEF", &reading);
        replay.read_counter = 2;
        let outcome = svc.verify(&replay).unwrap();
        assert!(!outcome.is_valid);
        assert_eq!(outcome.tamper_indicator, TamperIndicator::SignatureMismatch);
        assert_eq!(outcome.seal.status, SealStatus::Tampered);
        assert_eq!(outcome.integrity_score, 0);
        assert!(outcome.next_challenge.is_none());
    }

    #[test]
    fn counter_rollback_is_tampering_and_terminal() {
        let svc = service();
        attached_seal(&svc, "04ABCDEF");

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        svc.verify(&request("04ABCDEF", &reading)).unwrap();

        // Fresh valid signature but the counter went backward.
        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let mut req = request("04ABCDEF", &reading);
        req.read_counter = 0;
        let outcome = svc.verify(&req).unwrap();
        assert!(!outcome.is_valid);
        assert_eq!(outcome.tamper_indicator, TamperIndicator::CounterAnomaly);
        assert_eq!(outcome.seal.status, SealStatus::Tampered);
        assert_eq!(outcome.integrity_score, 0);

        // Terminal: the next attempt cannot run at all.
        let reading = ClaimedReading {
            serial_number: "04ABCDEF".into(),
            signature_der: vec![1, 2, 3],
            read_counter: 3,
        };
        let err = svc.verify(&request("04ABCDEF", &reading)).unwrap_err();
        assert!(matches!(err, SealError::InvalidState(_)));
    }

    #[test]
    fn counter_jump_boundaries() {
        let svc = service();
        attached_seal(&svc, "04ABCDEF");

        // expected + max_jump passes.
        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let mut req = request("04ABCDEF", &reading);
        req.read_counter = 10;
        assert!(svc.verify(&req).unwrap().is_valid);

        // expected + max_jump + 1 fails.
        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let mut req = request("04ABCDEF", &reading);
        req.read_counter = 21;
        let outcome = svc.verify(&req).unwrap();
        assert_eq!(outcome.tamper_indicator, TamperIndicator::CounterAnomaly);
    }

    #[test]
    fn location_mismatch_is_warning_not_invalid() {
        let svc = service();
        let seal = svc.provision("04ABCDEF", None).unwrap();
        svc.attach(
            &seal.id,
            "SHIP-1",
            "packer-1",
            None,
            Some(BERLIN.0),
            Some(BERLIN.1),
        )
        .unwrap();

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let mut req = request("04ABCDEF", &reading);
        req.latitude = Some(HAMBURG.0);
        req.longitude = Some(HAMBURG.1);
        let outcome = svc.verify(&req).unwrap();

        assert!(outcome.is_valid);
        assert_eq!(outcome.tamper_indicator, TamperIndicator::LocationMismatch);
        assert_eq!(outcome.seal.status, SealStatus::Verified);
        assert_eq!(outcome.integrity_score, 80);
        assert!(outcome.next_challenge.is_some());

        // A clean follow-up read clears the warning.
        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let mut req = request("04ABCDEF", &reading);
        req.latitude = Some(BERLIN.0);
        req.longitude = Some(BERLIN.1);
        let outcome = svc.verify(&req).unwrap();
        assert_eq!(outcome.tamper_indicator, TamperIndicator::None);
        assert_eq!(outcome.integrity_score, 100);
    }

    #[test]
    fn expired_seal_is_not_tampered() {
        let svc = service();
        let seal = svc
            .provision("04ABCDEF", Some("2020-01-01T00:00:00Z"))
            .unwrap();
        svc.attach(&seal.id, "SHIP-1", "packer-1", None, None, None)
            .unwrap();

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        let outcome = svc.verify(&request("04ABCDEF", &reading)).unwrap();
        assert!(!outcome.is_valid);
        assert_eq!(outcome.tamper_indicator, TamperIndicator::None);
        assert_eq!(outcome.seal.status, SealStatus::Expired);
        assert_eq!(outcome.integrity_score, 50);
        assert!(outcome.next_challenge.is_none());

        // Terminal like any other end state.
        let err = svc.verify(&request("04ABCDEF", &reading)).unwrap_err();
        assert!(matches!(err, SealError::InvalidState(_)));
    }

    #[test]
    fn verify_unknown_serial_is_not_found() {
        let svc = service();
        let reading = ClaimedReading {
            serial_number: "04ABCDEF".into(),
            signature_der: vec![],
            read_counter: 1,
        };
        assert!(matches!(
            svc.verify(&request("04ABCDEF", &reading)).unwrap_err(),
            SealError::NotFound(_)
        ));
    }

    #[test]
    fn verify_before_attach_is_invalid_state() {
        let svc = service();
        svc.provision("04ABCDEF", None).unwrap();
        let reading = ClaimedReading {
            serial_number: "04ABCDEF".into(),
            signature_der: vec![],
            read_counter: 1,
        };
        assert!(matches!(
            svc.verify(&request("04ABCDEF", &reading)).unwrap_err(),
            SealError::InvalidState(_)
        ));
    }

    #[test]
    fn every_verify_leaves_a_record() {
        let svc = service();
        attached_seal(&svc, "04ABCDEF");

        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        svc.verify(&request("04ABCDEF", &reading)).unwrap();

        let mut bad = request("04ABCDEF", &reading);
        bad.read_counter = 2;
        svc.verify(&bad).unwrap(); // tampered

        let history = svc.history("04ABCDEF").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_valid);
        assert!(!history[1].is_valid);
        assert_eq!(
            history[1].tamper_indicator,
            TamperIndicator::SignatureMismatch
        );
        // The record pins the challenge the signature was checked against.
        assert_eq!(history[0].challenge.len(), 64);
        assert_ne!(history[0].challenge, history[1].challenge);
    }

    #[test]
    fn remove_lifecycle() {
        let svc = service();
        let seal = attached_seal(&svc, "04ABCDEF");
        let removed = svc
            .remove(
                &seal.id,
                "receiver-1",
                Some("Destination dock".into()),
                Some("delivery complete".into()),
            )
            .unwrap();
        assert_eq!(removed.status, SealStatus::Removed);
        assert_eq!(removed.removed_by.as_deref(), Some("receiver-1"));
        assert_eq!(removed.removed_reason.as_deref(), Some("delivery complete"));

        assert!(matches!(
            svc.remove(&seal.id, "receiver-1", None, None).unwrap_err(),
            SealError::InvalidState(_)
        ));
    }

    #[test]
    fn damage_report_terminates_seal() {
        let svc = service();
        let seal = svc.provision("04ABCDEF", None).unwrap();
        let damaged = svc
            .report_damage(&seal.id, "inspector-1", "casing cracked")
            .unwrap();
        assert_eq!(damaged.status, SealStatus::Tampered);
        assert_eq!(damaged.tamper_indicator, TamperIndicator::PhysicalDamage);
        assert_eq!(damaged.tamper_details.as_deref(), Some("casing cracked"));

        assert!(matches!(
            svc.report_damage(&seal.id, "inspector-1", "again").unwrap_err(),
            SealError::InvalidState(_)
        ));
    }

    #[test]
    fn maintenance_views() {
        let svc = service();
        svc.provision("000000AA", Some("2020-01-01T00:00:00Z"))
            .unwrap();
        let attached = svc.provision("000000BB", None).unwrap();
        svc.attach(&attached.id, "SHIP-1", "packer-1", None, None, None)
            .unwrap();

        let expiring = svc.expiring_within_days(30).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].serial_number, "000000AA");

        let unattached = svc.unattached().unwrap();
        assert_eq!(unattached.len(), 1);
        assert_eq!(unattached[0].serial_number, "000000AA");
    }

    #[test]
    fn audit_bundle_has_full_trail() {
        let svc = service();
        attached_seal(&svc, "04ABCDEF");
        let reading = svc.simulate_reading("04ABCDEF").unwrap();
        svc.verify(&request("04ABCDEF", &reading)).unwrap();

        let bundle = svc.audit_bundle("04abcdef").unwrap();
        assert_eq!(bundle["seal"]["serial_number"], "04ABCDEF");
        assert_eq!(bundle["verifications"].as_array().unwrap().len(), 1);
    }
}
