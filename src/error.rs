//! Unified error type for the public API
//!
//! Internal modules keep their own error enums for precise handling. This
//! type gathers them for callers that only need to know what to do next.
//!
//! # Example
//!
//! ```no_run
//! use ultralight::{ErrorCategory, UltralightError};
//!
//! fn report(err: &UltralightError) {
//!     match err.category() {
//!         ErrorCategory::TagAbsent => eprintln!("no supported tag: {}", err),
//!         ErrorCategory::KeyUnknown => eprintln!("try other keys: {}", err),
//!         _ => eprintln!("{}", err),
//!     }
//! }
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::classify::ClassifyError;
use crate::config::ConfigError;
use crate::crypto::CipherError;
use crate::dump::DumpError;
use crate::emulator::EmulatorError;
use crate::info::InfoError;
use crate::memory::MemoryError;
use crate::tag_type::TagType;
use crate::transport::TransportError;
use crate::writer::WriteError;

/// What a failure means for the caller's next step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No tag, or not an Ultralight / NTAG: abort
    TagAbsent,
    /// Tag present but the memory is locked or password protected
    Protected,
    /// Tag present but no candidate key or password fits
    KeyUnknown,
    /// The reader or the tag stopped answering
    Transport,
    /// Malformed input, image or configuration
    Data,
}

/// Unified error type for all tag operations
///
/// # Error Categories
///
/// - **Transport**: reader failures and tag timeouts
/// - **Classify**: selection failures and foreign tag families
/// - **Auth**: rejected keys, passwords and challenge mismatches
/// - **Memory** / **Dump**: short reads and malformed images
#[derive(Debug, Error)]
pub enum UltralightError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Dump error: {0}")]
    Dump(#[from] DumpError),

    #[error("Info error: {0}")]
    Info(#[from] InfoError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Emulator error: {0}")]
    Emulator(#[from] EmulatorError),

    /// Classification produced no usable tag type
    #[error("Tag could not be identified ({0})")]
    Unidentified(TagType),

    /// None of the candidate keys or passwords was accepted
    #[error("No candidate key accepted after {attempts} attempts")]
    KeyUnknown { attempts: usize },
}

fn transport_category(e: &TransportError) -> ErrorCategory {
    match e {
        TransportError::NoTag => ErrorCategory::TagAbsent,
        TransportError::Nack(_) => ErrorCategory::Protected,
        TransportError::Truncated { .. } => ErrorCategory::Data,
        TransportError::Timeout(_) | TransportError::Reader(_) => ErrorCategory::Transport,
    }
}

fn auth_category(e: &AuthError) -> ErrorCategory {
    match e {
        AuthError::Transport(t) => transport_category(t),
        AuthError::Cipher(_) => ErrorCategory::Data,
        _ => ErrorCategory::KeyUnknown,
    }
}

impl UltralightError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(e) => transport_category(e),
            Self::Classify(_) | Self::Unidentified(_) => ErrorCategory::TagAbsent,
            Self::Auth(e) => auth_category(e),
            Self::KeyUnknown { .. } => ErrorCategory::KeyUnknown,
            Self::Dump(e) => match e {
                DumpError::Read { source, .. } | DumpError::Select(source) => {
                    transport_category(source)
                }
                DumpError::Auth(a) => auth_category(a),
                _ => ErrorCategory::Data,
            },
            Self::Info(e) => match e {
                InfoError::Select(source) | InfoError::Read { source, .. } => {
                    transport_category(source)
                }
                InfoError::Auth(a) => auth_category(a),
                InfoError::Unidentified(_) => ErrorCategory::TagAbsent,
                InfoError::Memory(_) => ErrorCategory::Data,
            },
            Self::Write(e) => match e {
                WriteError::ProtectedPage { .. }
                | WriteError::NotMagic(_)
                | WriteError::NotUltralightC(_)
                | WriteError::Rejected { .. } => ErrorCategory::Protected,
                WriteError::Transport(t) => transport_category(t),
                WriteError::Auth(a) => auth_category(a),
                WriteError::OutOfRange { .. } | WriteError::KeyLength(_) => ErrorCategory::Data,
            },
            Self::Cipher(_) | Self::Memory(_) | Self::Config(_) | Self::Emulator(_) => {
                ErrorCategory::Data
            }
        }
    }

    /// Returns true if the error is potentially retryable
    ///
    /// Timeouts and reader hiccups may clear on a fresh attempt; nothing is
    /// retried internally.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self.category() {
            ErrorCategory::TagAbsent => {
                Some("Place a MIFARE Ultralight or NTAG21x tag on the reader and retry")
            }
            ErrorCategory::Protected => {
                Some("Memory is locked or protected; authenticate first or read the unprotected pages only")
            }
            ErrorCategory::KeyUnknown => {
                Some("Add the tag's key or password to extra_keys / extra_passwords in the configuration")
            }
            ErrorCategory::Transport => Some("Check the reader connection and tag placement, then retry"),
            ErrorCategory::Data => None,
        }
    }

    /// Returns true if no supported tag was found
    pub fn is_tag_absent(&self) -> bool {
        self.category() == ErrorCategory::TagAbsent
    }

    /// Returns true if the tag refused access
    pub fn is_protected(&self) -> bool {
        self.category() == ErrorCategory::Protected
    }

    /// Returns true if the failure points at an unknown key
    pub fn is_key_unknown(&self) -> bool {
        self.category() == ErrorCategory::KeyUnknown
    }
}
