//! Admission-time tape inspection.
//!
//! The gateway never replays a tape; it only needs the header and footer
//! metadata (seed, frame count, claimed score, RNG state, checksum) to admit
//! a job and to cross-check the prover's journal later. The byte layout is
//! shared with the replay verifier:
//!
//! - 72-byte header: magic u32 LE, version u8, rules tag u8, two reserved
//!   zero bytes, seed u32 LE, frame_count u32 LE, 56-byte zero-padded
//!   claimant strkey
//! - `frame_count` input bytes (one per frame)
//! - 12-byte footer: final_score u32 LE, final_rng_state u32 LE, CRC32 of
//!   everything before the footer

use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CLAIMANT_ADDRESS_SIZE, MAX_FRAMES_DEFAULT, RULES_TAG, TAPE_FOOTER_SIZE, TAPE_HEADER_SIZE,
    TAPE_MAGIC, TAPE_VERSION,
};
use crate::error::TapeError;

/// Metadata parsed from a tape at admission time. Immutable for the life of
/// the job it admits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeSummary {
    pub seed: u32,
    pub frame_count: u32,
    pub final_score: u32,
    pub final_rng_state: u32,
    pub checksum: u32,
    pub claimant_address: String,
}

/// Parse and validate a tape's header and footer without replaying it.
///
/// `max_frames == 0` selects [`MAX_FRAMES_DEFAULT`].
pub fn parse_tape_summary(bytes: &[u8], max_frames: u32) -> Result<TapeSummary, TapeError> {
    let max_frames = if max_frames == 0 {
        MAX_FRAMES_DEFAULT
    } else {
        max_frames
    };

    let min_len = TAPE_HEADER_SIZE + TAPE_FOOTER_SIZE;
    if bytes.len() < min_len {
        return Err(TapeError::TapeTooShort {
            actual: bytes.len(),
            min: min_len,
        });
    }

    let magic = read_u32_le(bytes, 0);
    if magic != TAPE_MAGIC {
        return Err(TapeError::InvalidMagic { found: magic });
    }

    let version = bytes[4];
    if version != TAPE_VERSION {
        return Err(TapeError::UnsupportedVersion { found: version });
    }

    let rules_tag = bytes[5];
    if rules_tag != 0 && rules_tag != RULES_TAG {
        return Err(TapeError::UnknownRulesTag { found: rules_tag });
    }
    if bytes[6] != 0 || bytes[7] != 0 {
        return Err(TapeError::HeaderReservedNonZero);
    }

    let seed = read_u32_le(bytes, 8);
    let frame_count = read_u32_le(bytes, 12);
    if frame_count == 0 || frame_count > max_frames {
        return Err(TapeError::FrameCountOutOfRange {
            frame_count,
            max_frames,
        });
    }

    let expected_len = TAPE_HEADER_SIZE + frame_count as usize + TAPE_FOOTER_SIZE;
    if bytes.len() != expected_len {
        return Err(TapeError::TapeLengthMismatch {
            expected: expected_len,
            actual: bytes.len(),
        });
    }

    // Claimant strkey: 56 bytes at offset 16, trailing zeros trimmed.
    let claimant_raw = &bytes[16..16 + CLAIMANT_ADDRESS_SIZE];
    let claimant_end = claimant_raw
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    if claimant_end == 0 {
        return Err(TapeError::ClaimantEmpty);
    }
    let claimant_address = core::str::from_utf8(&claimant_raw[..claimant_end])
        .map_err(|_| TapeError::ClaimantNotUtf8)?
        .into();

    let footer_at = TAPE_HEADER_SIZE + frame_count as usize;
    let final_score = read_u32_le(bytes, footer_at);
    let final_rng_state = read_u32_le(bytes, footer_at + 4);
    let checksum = read_u32_le(bytes, footer_at + 8);

    let computed = crc32(&bytes[..footer_at]);
    if checksum != computed {
        return Err(TapeError::CrcMismatch {
            stored: checksum,
            computed,
        });
    }

    Ok(TapeSummary {
        seed,
        frame_count,
        final_score,
        final_rng_state,
        checksum,
        claimant_address,
    })
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

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;

    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;

        while j < 8 {
            c = if (c & 1) != 0 {
                0xEDB8_8320u32 ^ (c >> 1)
            } else {
                c >> 1
            };
            j += 1;
        }

        table[i] = c;
        i += 1;
    }

    table
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;

    for byte in data {
        let idx = ((crc ^ (*byte as u32)) & 0xFF) as usize;
        crc = CRC_TABLE[idx] ^ (crc >> 8);
    }

    crc ^ 0xFFFF_FFFFu32
}
