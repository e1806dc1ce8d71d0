//! Identification, authentication and memory dumps for MIFARE Ultralight,
//! Ultralight C, Ultralight EV1 and NTAG21x tags.
//!
//! The reader itself is abstracted behind [`Transport`]; [`Emulator`] is an
//! in-process implementation that answers like a real tag.

pub mod auth;
pub mod classify;
pub mod config;
pub mod crypto;
pub mod dump;
pub mod emulator;
pub mod error;
pub mod info;
pub mod memory;
pub mod prelude;
pub mod reader;
pub mod tag_type;
pub mod transport;
pub mod version;
pub mod writer;

pub use auth::{AuthError, AuthOutcome, Authenticator, PasswordMatch};
pub use classify::{decide, Classifier, ClassifyError};
pub use config::{ConfigError, ReaderConfig};
pub use crypto::{CipherError, TdesKey};
pub use dump::{DumpError, DumpRecord, Dumper};
pub use emulator::{Emulator, EmulatorError};
pub use error::{ErrorCategory, UltralightError};
pub use info::{InfoCollector, InfoError, TagInfo};
pub use memory::{interpret, summarize_config, ConfigSummary, LockBitTable, MemoryError, PageLock};
pub use reader::Reader;
pub use tag_type::TagType;
pub use transport::{FieldSession, SelectResult, Transport, TransportError, WriteAck};
pub use version::{VersionOutcome, VersionResponse};
pub use writer::WriteError;
