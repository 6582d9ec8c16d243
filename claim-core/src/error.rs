use core::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapeError {
    TapeTooShort { actual: usize, min: usize },
    InvalidMagic { found: u32 },
    UnsupportedVersion { found: u8 },
    UnknownRulesTag { found: u8 },
    HeaderReservedNonZero,
    FrameCountOutOfRange { frame_count: u32, max_frames: u32 },
    TapeLengthMismatch { expected: usize, actual: usize },
    CrcMismatch { stored: u32, computed: u32 },
    ClaimantNotUtf8,
    ClaimantEmpty,
}

impl fmt::Display for TapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TapeTooShort { actual, min } => {
                write!(f, "tape too short: got {actual} bytes, need at least {min}")
            }
            Self::InvalidMagic { found } => write!(f, "invalid tape magic: 0x{found:08x}"),
            Self::UnsupportedVersion { found } => write!(f, "unsupported tape version: {found}"),
            Self::UnknownRulesTag { found } => write!(f, "unknown rules tag: {found}"),
            Self::HeaderReservedNonZero => write!(f, "header reserved bytes are non-zero"),
            Self::FrameCountOutOfRange {
                frame_count,
                max_frames,
            } => write!(
                f,
                "frame count out of range: {frame_count} (allowed 1..={max_frames})"
            ),
            Self::TapeLengthMismatch { expected, actual } => write!(
                f,
                "tape length mismatch: expected {expected} bytes, got {actual}"
            ),
            Self::CrcMismatch { stored, computed } => write!(
                f,
                "tape checksum mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}"
            ),
            Self::ClaimantNotUtf8 => write!(f, "claimant address is not valid UTF-8"),
            Self::ClaimantEmpty => write!(f, "claimant address slot is empty"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TapeError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalError {
    /// Payload is exactly the pre-claimant 24-byte layout. That encoding
    /// is no longer accepted; the claimant must be bound into the journal.
    LegacyEncoding,
    TooShort { actual: usize, min: usize },
    ClaimantLengthOutOfRange { len: u32, max: u32 },
    LengthMismatch { expected: usize, actual: usize },
    ClaimantNotUtf8,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyEncoding => write!(
                f,
                "journal uses the legacy 24-byte encoding without a claimant address; \
                 only the claimant-bearing encoding is accepted"
            ),
            Self::TooShort { actual, min } => {
                write!(f, "journal too short: got {actual} bytes, need at least {min}")
            }
            Self::ClaimantLengthOutOfRange { len, max } => {
                write!(f, "claimant address length out of range: {len} (max {max})")
            }
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "journal length mismatch: expected {expected} bytes, got {actual}"
            ),
            Self::ClaimantNotUtf8 => write!(f, "claimant address is not valid UTF-8"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for JournalError {}
