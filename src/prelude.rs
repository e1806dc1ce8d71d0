//! Commonly used types
//!
//! ```rust
//! use ultralight::prelude::*;
//!
//! # fn example() -> Result<(), UltralightError> {
//! let mut reader = Reader::new(Emulator::factory(TagType::NTAG_213, [0x04, 1, 2, 3, 4, 5, 6])?);
//! assert_eq!(reader.try_classify()?, TagType::NTAG_213);
//! # Ok(())
//! # }
//! ```

pub use crate::auth::{AuthOutcome, PasswordMatch, DEFAULT_3DES_KEYS, DEFAULT_PASSWORDS};
pub use crate::config::ReaderConfig;
pub use crate::crypto::TdesKey;
pub use crate::dump::DumpRecord;
pub use crate::emulator::Emulator;
pub use crate::error::{ErrorCategory, UltralightError};
pub use crate::info::TagInfo;
pub use crate::memory::{ConfigSummary, LockBitTable, PageLock};
pub use crate::reader::Reader;
pub use crate::tag_type::TagType;
pub use crate::transport::{FieldSession, Transport};
