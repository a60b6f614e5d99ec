//! Reader-side signing for development and CI.
//!
//! **Simulation only.**  In a real deployment the private key lives inside
//! the tag's secure element: the tag signs, the server verifies, and the
//! code in this module never runs.  The server-held encrypted key copy
//! exists solely so that [`SimulatedSealReader`] can produce readings that
//! look like hardware output without physical tags -- keep this path out of
//! any production verify flow.

use crate::crypto::{self, MasterKey};
use crate::error::Result;
use crate::seal::Seal;

/// What a handheld reader reports after interrogating a tag.  Untrusted
/// input: every field is re-checked by the verification orchestrator.
#[derive(Debug, Clone)]
pub struct ClaimedReading {
    pub serial_number: String,
    /// DER-encoded ECDSA signature over the outstanding challenge.
    pub signature_der: Vec<u8>,
    /// The tag's monotonic read counter after this read.
    pub read_counter: i64,
}

/// Trait boundary for reading a tag.
///
/// Production: NFC reader hardware via a vendor SDK, outside this crate.
/// Development and CI: [`SimulatedSealReader`].
pub trait SealReader {
    fn read(&mut self, seal: &Seal) -> Result<ClaimedReading>;
}

/// Simulated reader that signs with the server-held (decrypted) private key
/// and increments the read counter like a well-behaved tag.
pub struct SimulatedSealReader<'a> {
    master_key: &'a MasterKey,
    /// Counter increment per read; a real tag advances by 1.
    pub counter_step: i64,
}

impl std::fmt::Debug for SimulatedSealReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSealReader")
            .field("counter_step", &self.counter_step)
            .finish_non_exhaustive()
    }
}

impl<'a> SimulatedSealReader<'a> {
    pub fn new(master_key: &'a MasterKey) -> Self {
        Self {
            master_key,
            counter_step: 1,
        }
    }
}

impl SealReader for SimulatedSealReader<'_> {
    fn read(&mut self, seal: &Seal) -> Result<ClaimedReading> {
        let private_key = crypto::decrypt_private_key(&seal.encrypted_private_key, self.master_key)?;
        let signature_der = crypto::sign_challenge(&seal.challenge, &private_key)?;
        Ok(ClaimedReading {
            serial_number: seal.serial_number.clone(),
            signature_der,
            read_counter: seal.expected_read_count + self.counter_step,
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
