//! Random identifier generation.

use super::{StorageError, StorageResult};
use crate::models::{ID_LEN, PasteId};
use rand::RngCore;

/// Candidates tried before giving up on a crowded namespace.
pub const MAX_ATTEMPTS: usize = 64;

/// Draw random ids until `is_available` accepts one.
///
/// The generator is not race-free on its own: callers must run the
/// availability check and the insertion of the returned id under the same
/// lock.
pub fn generate(mut is_available: impl FnMut(&PasteId) -> bool) -> StorageResult<PasteId> {
    let mut rng = rand::rng();
    for _ in 0..MAX_ATTEMPTS {
        let mut bytes = [0u8; ID_LEN];
        rng.fill_bytes(&mut bytes);
        let id = PasteId::from_bytes(bytes);
        if is_available(&id) {
            return Ok(id);
        }
    }
    Err(StorageError::IdSpaceExhausted {
        attempts: MAX_ATTEMPTS,
    })
}
