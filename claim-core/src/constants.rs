//! Wire-format constants shared by the tape and journal encodings.

pub const TAPE_MAGIC: u32 = 0x5A4B_5450; // "ZKTP"
pub const TAPE_VERSION: u8 = 1;
pub const RULES_TAG: u8 = 3;

pub const TAPE_HEADER_SIZE: usize = 72;
pub const TAPE_FOOTER_SIZE: usize = 12;
/// Claimant strkey slot in the header: 56 bytes, zero-padded.
pub const CLAIMANT_ADDRESS_SIZE: usize = 56;

pub const MAX_FRAMES_DEFAULT: u32 = 108_000;

/// Digest of the simulation ruleset. Proofs and the on-chain policy must
/// both carry this value for a claim to settle.
pub const RULES_DIGEST: u32 = 0x4153_5433; // "AST3"
pub const RULESET_NAME: &str = "ast3-v2";

/// Journal V2 layout: 24-byte base (6 x u32 LE), then u32 LE claimant
/// length, then the claimant strkey bytes.
pub const JOURNAL_BASE_LEN: usize = 24;
pub const MAX_CLAIMANT_ADDR_LEN: usize = 128;
