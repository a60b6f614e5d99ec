//! Deterministic 0-100 integrity scoring from seal state and verification
//! history.
//!
//! Shipment-level aggregation (min or average across all seals on a
//! shipment) is the caller's concern, not part of this core.

use crate::seal::{Seal, SealStatus, TamperIndicator, VerificationRecord};

/// Penalty per invalid verification record in the history.
const INVALID_RECORD_PENALTY: i64 = 20;

/// Penalty for a current warning-class indicator (location mismatch).
const WARNING_PENALTY: i64 = 20;

/// Score a seal's trustworthiness.  Pure function of the current state plus
/// the append-only history.
///
/// - `Tampered` scores 0 regardless of anything else.
/// - `Expired` scores a fixed 50.
/// - Otherwise start at 100, subtract 20 per invalid record (flooring at 0
///   during accumulation), subtract a further 20 when the seal currently
///   carries the `LocationMismatch` warning, and clamp to `[0, 100]`.
pub fn integrity_score(seal: &Seal, history: &[VerificationRecord]) -> u8 {
    match seal.status {
        SealStatus::Tampered => 0,
        SealStatus::Expired => 50,
        _ => {
            let mut score: i64 = 100;
            for record in history {
                if !record.is_valid {
                    score = (score - INVALID_RECORD_PENALTY).max(0);
                }
            }
            if seal.tamper_indicator == TamperIndicator::LocationMismatch {
                score -= WARNING_PENALTY;
            }
            score.clamp(0, 100) as u8
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
