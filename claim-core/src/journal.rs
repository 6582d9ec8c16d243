//! The journal bound inside a successful proof, and its wire encoding.
//!
//! The encoding is explicitly versioned. The current (V2) layout is:
//!
//! - bytes 0..24: seed, frame_count, final_score, final_rng_state,
//!   tape_checksum, rules_digest — six u32 LE words
//! - bytes 24..28: claimant address length, u32 LE
//! - bytes 28..: claimant address, ASCII strkey
//!
//! The pre-claimant 24-byte layout (V1) is rejected outright rather than
//! inferred from length; see [`JournalError::LegacyEncoding`].

use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{JOURNAL_BASE_LEN, MAX_CLAIMANT_ADDR_LEN};
use crate::error::JournalError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreJournal {
    pub seed: u32,
    pub frame_count: u32,
    pub final_score: u32,
    pub final_rng_state: u32,
    pub tape_checksum: u32,
    pub rules_digest: u32,
    pub claimant_address: String,
}

impl ScoreJournal {
    /// Serialize to the V2 wire layout the score contract consumes.
    pub fn encode_raw(&self) -> Vec<u8> {
        let claimant = self.claimant_address.as_bytes();
        let mut raw = Vec::with_capacity(JOURNAL_BASE_LEN + 4 + claimant.len());
        raw.extend_from_slice(&self.seed.to_le_bytes());
        raw.extend_from_slice(&self.frame_count.to_le_bytes());
        raw.extend_from_slice(&self.final_score.to_le_bytes());
        raw.extend_from_slice(&self.final_rng_state.to_le_bytes());
        raw.extend_from_slice(&self.tape_checksum.to_le_bytes());
        raw.extend_from_slice(&self.rules_digest.to_le_bytes());
        raw.extend_from_slice(&(claimant.len() as u32).to_le_bytes());
        raw.extend_from_slice(claimant);
        raw
    }

    /// Decode the V2 wire layout.
    pub fn decode_raw(raw: &[u8]) -> Result<Self, JournalError> {
        if raw.len() == JOURNAL_BASE_LEN {
            return Err(JournalError::LegacyEncoding);
        }
        let min = JOURNAL_BASE_LEN + 4;
        if raw.len() < min {
            return Err(JournalError::TooShort {
                actual: raw.len(),
                min,
            });
        }

        let claimant_len = read_u32_le(raw, JOURNAL_BASE_LEN);
        if claimant_len == 0 || claimant_len as usize > MAX_CLAIMANT_ADDR_LEN {
            return Err(JournalError::ClaimantLengthOutOfRange {
                len: claimant_len,
                max: MAX_CLAIMANT_ADDR_LEN as u32,
            });
        }

        let expected = JOURNAL_BASE_LEN + 4 + claimant_len as usize;
        if raw.len() != expected {
            return Err(JournalError::LengthMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let claimant_address = core::str::from_utf8(&raw[JOURNAL_BASE_LEN + 4..])
            .map_err(|_| JournalError::ClaimantNotUtf8)?
            .into();

        Ok(Self {
            seed: read_u32_le(raw, 0),
            frame_count: read_u32_le(raw, 4),
            final_score: read_u32_le(raw, 8),
            final_rng_state: read_u32_le(raw, 12),
            tape_checksum: read_u32_le(raw, 16),
            rules_digest: read_u32_le(raw, 20),
            claimant_address,
        })
    }
}

/// SHA-256 of the raw journal bytes. The contract uses the same digest for
/// replay protection, so this must stay byte-identical to `encode_raw`.
pub fn journal_digest(raw: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hasher.finalize().into()
}

#[inline]
fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
