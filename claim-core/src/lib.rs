#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod journal;
pub mod tape;

pub use error::{JournalError, TapeError};
pub use journal::{journal_digest, ScoreJournal};
pub use tape::{crc32, parse_tape_summary, TapeSummary};
